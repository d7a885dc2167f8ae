//! # geoguard-tracker
//!
//! Headless tracker: follows gpsd, shares the signed-in user's live location
//! with the GeoGuard document store and keeps unsent fixes in a local SQLite
//! queue until the store is reachable again.
//!
//! Store reachability is polled through `/health`; transitions are fed to
//! the session and the sync worker as connectivity events.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use geoguard_client::{
    connectivity, init_tracing, AuthUser, ClientConfig, GpsdSource, HttpDocumentStore, PendingQueue,
    RemoteLocationWriter, SessionParts, SharedAuth, SyncConfig, SyncCoordinator,
    TrackingSession, WatchOptions,
};
use geoguard_store::Database;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("Starting GeoGuard tracker v{}", env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let (user_id, email) = match (&config.user_id, &config.email) {
        (Some(id), Some(email)) => (id.clone(), email.clone()),
        _ => anyhow::bail!("GEOGUARD_USER_ID and GEOGUARD_EMAIL must be set"),
    };
    let mut user = AuthUser::new(user_id.clone(), email.clone());
    user.display_name = config.display_name.clone();
    let auth = Arc::new(SharedAuth::signed_in(user, config.admins.clone()));

    // -----------------------------------------------------------------------
    // Local queue
    // -----------------------------------------------------------------------
    let db = match &config.db_path {
        Some(path) => Database::open_at(path),
        None => Database::new(),
    }
    .context("opening local database")?;
    if let Some(path) = db.path() {
        info!(path = %path.display(), "Local database ready");
    }
    let queue = PendingQueue::new(Arc::new(Mutex::new(db)), user_id.clone(), config.queue_capacity)?;

    // -----------------------------------------------------------------------
    // Collaborators
    // -----------------------------------------------------------------------
    let store = Arc::new(HttpDocumentStore::new(
        config.server_url.clone(),
        user_id,
        email,
    )?);
    let source = Arc::new(GpsdSource::new(config.gpsd_addr.clone()));
    let sync = SyncCoordinator::register(SyncConfig {
        periodic_interval: Some(config.sync_interval),
        ..SyncConfig::default()
    });

    let session = TrackingSession::new(SessionParts {
        auth,
        source,
        writer: RemoteLocationWriter::new(store.clone()),
        queue,
        sync: Some(sync.clone()),
        watch: WatchOptions {
            timeout: config.fix_timeout,
            ..WatchOptions::default()
        },
        resample: WatchOptions {
            timeout: config.resample_timeout,
            ..WatchOptions::resample()
        },
    });

    let mut status = session.subscribe_status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow_and_update();
            info!(
                status = %current,
                indicator = current.indicator().label(),
                "{}",
                current.message()
            );
        }
    });

    session.start().await.context("starting tracking session")?;

    let (mut reachability, _monitor) =
        connectivity::spawn_monitor(config.connectivity_interval, move || {
            let store = store.clone();
            async move { store.health().await.is_ok() }
        });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res?;
                info!("Received Ctrl+C, shutting down");
                break;
            }
            Some(online) = reachability.recv() => {
                info!(online, "Store reachability changed");
                session.connectivity_changed(online);
                if let Err(e) = sync.connectivity_changed(online).await {
                    warn!(error = %e, "Sync worker did not take the connectivity event");
                }
            }
        }
    }

    drop(reachability);
    session.shutdown(SHUTDOWN_GRACE).await;
    sync.shutdown().await;

    if let Some(last) = session.last_known_position() {
        info!(lat = last.latitude, lon = last.longitude, "Last known position");
    } else {
        warn!("No position was acquired");
    }
    Ok(())
}
