//! # geoguard-store
//!
//! On-device storage for the GeoGuard tracker, backed by SQLite.
//!
//! The store survives process restarts and holds two things per account: a
//! bounded queue of samples whose remote write failed, and the last known
//! location. [`Database`] wraps a `rusqlite::Connection`; [`PendingQueue`] is
//! the shareable handle the tracking session works with.

pub mod database;
pub mod last_known;
pub mod migrations;
pub mod models;
pub mod queue;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::PendingQueueEntry;
pub use queue::PendingQueue;
