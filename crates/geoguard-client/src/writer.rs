//! Remote Location Writer.
//!
//! Upserts the signed-in user's latest position into the shared document
//! store. The writer is stateless: it never retries and never reads before
//! writing. Backlog and retry policy belong to the tracking session.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use geoguard_shared::constants::{LOCATIONS_COLLECTION, USERS_COLLECTION};
use geoguard_shared::{merge_document, Document, LocationPatch, PositionSample, RemoteError, UserMeta};

use crate::auth::AuthUser;

/// Shared document store collaborator.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert-or-merge `patch` into the document at `collection/key`.
    async fn upsert(&self, collection: &str, key: &str, patch: Document)
        -> Result<(), RemoteError>;

    async fn get_one(&self, collection: &str, key: &str) -> Result<Option<Document>, RemoteError>;

    async fn get_all(&self, collection: &str) -> Result<Vec<(String, Document)>, RemoteError>;
}

#[derive(Clone)]
pub struct RemoteLocationWriter {
    store: Arc<dyn DocumentStore>,
}

impl RemoteLocationWriter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn write(&self, sample: &PositionSample, meta: &UserMeta) -> Result<(), RemoteError> {
        let patch = LocationPatch::position(sample, meta).into_document()?;
        self.store
            .upsert(LOCATIONS_COLLECTION, &meta.user_id, patch)
            .await?;
        debug!(
            user = %meta.user_id,
            lat = sample.latitude,
            lon = sample.longitude,
            "location written"
        );
        Ok(())
    }

    /// Flip the record to offline without touching the position fields.
    pub async fn mark_offline(&self, user_id: &str) -> Result<(), RemoteError> {
        let patch = LocationPatch::offline(Utc::now()).into_document()?;
        self.store.upsert(LOCATIONS_COLLECTION, user_id, patch).await
    }

    /// Display name for location records: `firstName lastName` from the
    /// user's profile, else the identity's name, else the email local part.
    pub async fn resolve_display_name(&self, user: &AuthUser) -> String {
        match self.store.get_one(USERS_COLLECTION, &user.id).await {
            Ok(Some(profile)) => profile_name(&profile).unwrap_or_else(|| user.fallback_name()),
            Ok(None) => user.fallback_name(),
            Err(e) => {
                debug!(user = %user.id, error = %e, "profile lookup failed, using fallback name");
                user.fallback_name()
            }
        }
    }
}

fn profile_name(profile: &Document) -> Option<String> {
    let field = |name: &str| {
        profile
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };
    match (field("firstName"), field("lastName")) {
        (Some(first), Some(last)) => Some(format!("{first} {last}")),
        (Some(only), None) | (None, Some(only)) => Some(only.to_string()),
        (None, None) => None,
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Process-local store with merge semantics; can be switched offline to
/// simulate network failures.
#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<HashMap<String, BTreeMap<String, Document>>>,
    upserts: Mutex<Vec<(String, String, Document)>>,
    offline: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    /// Delay applied to every call before it resolves.
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut guard) = self.latency.lock() {
            *guard = latency;
        }
    }

    /// Every accepted upsert, in arrival order.
    pub fn upserts(&self) -> Vec<(String, String, Document)> {
        self.upserts.lock().map(|u| u.clone()).unwrap_or_default()
    }

    pub fn document(&self, collection: &str, key: &str) -> Option<Document> {
        self.collections
            .lock()
            .ok()?
            .get(collection)?
            .get(key)
            .cloned()
    }

    /// Seed a document directly, bypassing the online check.
    pub fn insert(&self, collection: &str, key: &str, doc: Document) {
        if let Ok(mut collections) = self.collections.lock() {
            collections
                .entry(collection.to_string())
                .or_default()
                .insert(key.to_string(), doc);
        }
    }

    async fn round_trip(&self) -> Result<(), RemoteError> {
        let latency = self.latency.lock().ok().and_then(|l| *l);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Network("store unreachable".into()));
        }
        Ok(())
    }

    fn poisoned() -> RemoteError {
        RemoteError::Rejected {
            status: 500,
            message: "store lock poisoned".into(),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn upsert(
        &self,
        collection: &str,
        key: &str,
        patch: Document,
    ) -> Result<(), RemoteError> {
        self.round_trip().await?;

        let mut collections = self.collections.lock().map_err(|_| Self::poisoned())?;
        let doc = collections
            .entry(collection.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default();
        merge_document(doc, patch.clone());
        drop(collections);

        self.upserts
            .lock()
            .map_err(|_| Self::poisoned())?
            .push((collection.to_string(), key.to_string(), patch));
        Ok(())
    }

    async fn get_one(&self, collection: &str, key: &str) -> Result<Option<Document>, RemoteError> {
        self.round_trip().await?;
        Ok(self.document(collection, key))
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<(String, Document)>, RemoteError> {
        self.round_trip().await?;
        let collections = self.collections.lock().map_err(|_| Self::poisoned())?;
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}
