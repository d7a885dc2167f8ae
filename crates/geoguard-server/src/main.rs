//! # geoguard-server
//!
//! Reference document store for GeoGuard trackers.
//!
//! This binary provides:
//! - **Collections of JSON documents** keyed by user id, written with merge
//!   semantics so presence and position fields update independently
//! - **Owner-only writes**: administrators read every record but only write
//!   their own
//! - **Admin location overview** with the count of recently active users

mod api;
mod config;
mod documents;
mod error;
mod identity;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::documents::DocumentStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,geoguard_server=debug")),
        )
        .init();

    info!("Starting GeoGuard server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    if config.admins.is_empty() {
        tracing::warn!("ADMIN_EMAILS is empty, admin endpoints will refuse every caller");
    }

    let http_addr = config.http_addr;
    let app_state = AppState {
        documents: Arc::new(DocumentStore::new()),
        config: Arc::new(config),
    };

    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
