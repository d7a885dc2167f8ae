//! In-memory document store with merge-on-write semantics.
//!
//! Documents live in named collections and are keyed by a caller supplied
//! string. A write merges the incoming fields into the stored document, so
//! different writers can update disjoint fields of the same record.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::RwLock;
use tracing::debug;

use geoguard_shared::{merge_document, Document};

use crate::error::ServerError;

const MAX_SEGMENT_LEN: usize = 128;

#[derive(Default)]
pub struct DocumentStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Document>>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `patch` into `collection/key`, creating the document if needed.
    /// Returns the stored document.
    pub async fn upsert(
        &self,
        collection: &str,
        key: &str,
        patch: Document,
    ) -> Result<Document, ServerError> {
        validate_segment("collection", collection)?;
        validate_segment("key", key)?;

        let mut collections = self.collections.write().await;
        let doc = collections
            .entry(collection.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default();
        let fields = patch.len();
        merge_document(doc, patch);
        debug!(collection, key, fields, "document upserted");
        Ok(doc.clone())
    }

    pub async fn get(&self, collection: &str, key: &str) -> Option<Document> {
        self.collections
            .read()
            .await
            .get(collection)
            .and_then(|docs| docs.get(key))
            .cloned()
    }

    /// Every document of `collection`, ordered by key.
    pub async fn list(&self, collection: &str) -> Vec<(String, Document)> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|docs| docs.iter().map(|(k, d)| (k.clone(), d.clone())).collect())
            .unwrap_or_default()
    }
}

/// Collection names and keys: 1..=128 chars of `[A-Za-z0-9._@-]`.
pub fn validate_segment(what: &str, value: &str) -> Result<(), ServerError> {
    let valid = !value.is_empty()
        && value.len() <= MAX_SEGMENT_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | '-'));
    if valid {
        Ok(())
    } else {
        Err(ServerError::BadRequest(format!("invalid {what}: {value:?}")))
    }
}
