use thiserror::Error;

use geoguard_shared::SamplerError;
use geoguard_store::StoreError;

#[derive(Error, Debug)]
pub enum TrackingError {
    /// No signed-in user: the session never writes anonymously.
    #[error("Sign in required")]
    AuthRequired,

    #[error("Location error: {0}")]
    Sampler(#[from] SamplerError),

    #[error("Local storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Background sync worker is gone")]
    WorkerGone,
}
