//! Messages exchanged between a page and the background sync worker.
//!
//! The two sides share no memory: everything crosses the channel by value,
//! and delivery is at-least-once with no ordering guarantee.

use serde::{Deserialize, Serialize};

use crate::constants::{PERIODIC_SYNC_TAG, SYNC_TAG};
use crate::types::PositionSample;

/// Message posted by a page to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageMessage {
    /// Latest accepted fix, kept by the worker for its own bookkeeping.
    LocationUpdate { location: PositionSample },
}

/// Message posted by the worker to every attached page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    /// Resample now and flush anything queued.
    SyncLocation { reason: SyncReason },
}

/// What woke the worker up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncReason {
    /// One-off background sync (`sync-location`).
    OneOff,
    /// Periodic background sync (`location-update`).
    Periodic,
    /// The device came back online.
    ConnectivityRestored,
    /// Request recorded while no page was attached.
    Deferred,
}

impl SyncReason {
    /// Map a platform sync tag to a reason; unknown tags are ignored.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            SYNC_TAG => Some(SyncReason::OneOff),
            PERIODIC_SYNC_TAG => Some(SyncReason::Periodic),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags() {
        assert_eq!(SyncReason::from_tag("sync-location"), Some(SyncReason::OneOff));
        assert_eq!(SyncReason::from_tag("location-update"), Some(SyncReason::Periodic));
        assert_eq!(SyncReason::from_tag("push"), None);
    }

    #[test]
    fn test_worker_message_wire_shape() {
        let msg = WorkerMessage::SyncLocation {
            reason: SyncReason::Periodic,
        };
        let json = serde_json::to_value(msg).unwrap();
        assert_eq!(json["type"], "SYNC_LOCATION");
        assert_eq!(json["reason"], "periodic");
    }
}
