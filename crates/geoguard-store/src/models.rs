//! Rows persisted in the local database.

use serde::{Deserialize, Serialize};

use geoguard_shared::PositionSample;

/// A sample whose remote write failed, waiting for the next flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingQueueEntry {
    /// Monotonic row id; higher is newer.
    pub id: i64,
    pub sample: PositionSample,
    pub enqueued_at_ms: i64,
}
