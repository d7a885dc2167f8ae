use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::Method,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use geoguard_shared::constants::LOCATIONS_COLLECTION;
use geoguard_shared::{Document, LocationRecord};

use crate::config::ServerConfig;
use crate::documents::{validate_segment, DocumentStore};
use crate::error::ServerError;
use crate::identity::Caller;

#[derive(Clone)]
pub struct AppState {
    pub documents: Arc<DocumentStore>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/v1/collections/{collection}/docs", get(list_documents))
        .route(
            "/v1/collections/{collection}/docs/{key}",
            get(get_document).put(put_document),
        )
        .route("/v1/admin/locations", get(admin_locations))
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct KeyedDocument {
    key: String,
    document: Document,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AdminLocation {
    #[serde(flatten)]
    record: LocationRecord,
    recent: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AdminLocationsResponse {
    total: usize,
    recent: usize,
    locations: Vec<AdminLocation>,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn require_admin(caller: &Caller, state: &AppState) -> Result<(), ServerError> {
    if caller.is_admin(&state.config.admins) {
        Ok(())
    } else {
        Err(ServerError::Forbidden("administrator only".into()))
    }
}

async fn put_document(
    caller: Caller,
    State(state): State<AppState>,
    Path((collection, key)): Path<(String, String)>,
    Json(patch): Json<Document>,
) -> Result<Json<Document>, ServerError> {
    // Administrators read everything but write only their own records.
    if !caller.owns(&key) {
        return Err(ServerError::Forbidden(format!(
            "cannot write {collection}/{key}"
        )));
    }
    let doc = state.documents.upsert(&collection, &key, patch).await?;
    info!(collection = %collection, key = %key, "document written");
    Ok(Json(doc))
}

async fn get_document(
    caller: Caller,
    State(state): State<AppState>,
    Path((collection, key)): Path<(String, String)>,
) -> Result<Json<Document>, ServerError> {
    validate_segment("collection", &collection)?;
    validate_segment("key", &key)?;
    if !caller.owns(&key) && !caller.is_admin(&state.config.admins) {
        return Err(ServerError::Forbidden(format!("cannot read {collection}/{key}")));
    }
    state
        .documents
        .get(&collection, &key)
        .await
        .map(Json)
        .ok_or_else(|| ServerError::NotFound(format!("{collection}/{key}")))
}

async fn list_documents(
    caller: Caller,
    State(state): State<AppState>,
    Path(collection): Path<String>,
) -> Result<Json<Vec<KeyedDocument>>, ServerError> {
    validate_segment("collection", &collection)?;
    require_admin(&caller, &state)?;
    let docs = state
        .documents
        .list(&collection)
        .await
        .into_iter()
        .map(|(key, document)| KeyedDocument { key, document })
        .collect();
    Ok(Json(docs))
}

async fn admin_locations(
    caller: Caller,
    State(state): State<AppState>,
) -> Result<Json<AdminLocationsResponse>, ServerError> {
    require_admin(&caller, &state)?;

    let now = Utc::now();
    let window = state.config.recent_window_secs;
    let locations: Vec<AdminLocation> = state
        .documents
        .list(LOCATIONS_COLLECTION)
        .await
        .into_iter()
        .filter_map(|(key, doc)| match LocationRecord::from_document(&doc) {
            Ok(record) => Some(AdminLocation {
                recent: record.is_recent(now, window),
                record,
            }),
            Err(e) => {
                // Presence-only records never received a position.
                warn!(key = %key, error = %e, "skipping incomplete location record");
                None
            }
        })
        .collect();

    Ok(Json(AdminLocationsResponse {
        total: locations.len(),
        recent: locations.iter().filter(|l| l.recent).count(),
        locations,
    }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);
    info!(addr = %addr, "Starting HTTP API server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
