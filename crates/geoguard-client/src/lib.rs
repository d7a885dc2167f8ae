//! Offline-resilient location tracking client.
//!
//! A [`TrackingSession`] samples the device position through a
//! [`PositionSource`], upserts it into the shared document store and falls
//! back to the on-device [`PendingQueue`] when the store is unreachable. The
//! [`SyncCoordinator`] worker turns platform sync triggers into resample
//! requests for the running session.

pub mod auth;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod gpsd;
pub mod http_store;
pub mod sampler;
pub mod session;
pub mod sync;
pub mod writer;

use tracing_subscriber::{fmt, EnvFilter};

pub use auth::{AuthProvider, AuthUser, SharedAuth};
pub use config::ClientConfig;
pub use error::TrackingError;
pub use geoguard_store::PendingQueue;
pub use gpsd::GpsdSource;
pub use http_store::HttpDocumentStore;
pub use sampler::{FakePositionSource, PositionSampler, PositionSource, SamplerEvent, WatchOptions};
pub use session::{SessionParts, TrackingSession};
pub use sync::{SyncConfig, SyncCoordinator, SyncPort, WorkerStatus};
pub use writer::{DocumentStore, MemoryDocumentStore, RemoteLocationWriter};

/// Install the fmt subscriber; `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("geoguard_tracker=info,geoguard_client=debug,geoguard_store=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
