use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::{RemoteError, SamplerError};

/// Current wall-clock time in Unix epoch millis.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// PositionSample
// ---------------------------------------------------------------------------

/// One fix reported by the device. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSample {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: Option<f64>,
    pub captured_at_ms: i64,
}

impl PositionSample {
    pub fn new(latitude: f64, longitude: f64, accuracy_meters: Option<f64>) -> Self {
        Self::at(latitude, longitude, accuracy_meters, now_ms())
    }

    pub fn at(
        latitude: f64,
        longitude: f64,
        accuracy_meters: Option<f64>,
        captured_at_ms: i64,
    ) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_meters,
            captured_at_ms,
        }
    }

    /// Coordinates within WGS84 bounds and a non-negative finite accuracy.
    pub fn is_valid(&self) -> bool {
        let coords_ok = self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude);
        let accuracy_ok = self
            .accuracy_meters
            .map_or(true, |a| a.is_finite() && a >= 0.0);
        coords_ok && accuracy_ok
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.captured_at_ms)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

// ---------------------------------------------------------------------------
// User metadata
// ---------------------------------------------------------------------------

/// Identity fields copied onto every location record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMeta {
    pub user_id: String,
    pub display_name: String,
    pub email: String,
}

/// Fallback display name: the local part of an email address.
pub fn email_local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}

// ---------------------------------------------------------------------------
// LocationRecord (remote, one per user)
// ---------------------------------------------------------------------------

/// The remote record holding a user's latest delivered position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    pub user_id: String,
    pub display_name: String,
    pub email: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: Option<f64>,
    pub captured_at: DateTime<Utc>,
    pub is_online: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl LocationRecord {
    pub fn from_document(doc: &Document) -> Result<Self, RemoteError> {
        serde_json::from_value(serde_json::Value::Object(doc.clone()))
            .map_err(|e| RemoteError::InvalidDocument(e.to_string()))
    }

    /// Captured within `window_secs` of `now`.
    pub fn is_recent(&self, now: DateTime<Utc>, window_secs: i64) -> bool {
        now.signed_duration_since(self.captured_at).num_seconds() < window_secs
    }
}

/// Partial record sent with merge semantics. Absent fields are left
/// untouched by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy_meters: Option<Option<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_online: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl LocationPatch {
    /// Position update: identity, coordinates and the online flag.
    pub fn position(sample: &PositionSample, meta: &UserMeta) -> Self {
        Self {
            user_id: Some(meta.user_id.clone()),
            display_name: Some(meta.display_name.clone()),
            email: Some(meta.email.clone()),
            latitude: Some(sample.latitude),
            longitude: Some(sample.longitude),
            accuracy_meters: Some(sample.accuracy_meters),
            captured_at: Some(sample.captured_at()),
            is_online: Some(true),
            last_seen_at: None,
        }
    }

    /// Presence-only update leaving the position fields alone.
    pub fn offline(at: DateTime<Utc>) -> Self {
        Self {
            is_online: Some(false),
            last_seen_at: Some(at),
            ..Self::default()
        }
    }

    pub fn into_document(self) -> Result<Document, RemoteError> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(other) => Err(RemoteError::InvalidDocument(format!(
                "expected an object, got {other}"
            ))),
            Err(e) => Err(RemoteError::InvalidDocument(e.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tracking status
// ---------------------------------------------------------------------------

/// Why a running session is degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    PermissionDenied,
    PositionUnavailable,
    Timeout,
    NotSupported,
    RemoteWriteFailed,
    Offline,
}

impl From<SamplerError> for DegradedReason {
    fn from(err: SamplerError) -> Self {
        match err {
            SamplerError::PermissionDenied => DegradedReason::PermissionDenied,
            SamplerError::PositionUnavailable => DegradedReason::PositionUnavailable,
            SamplerError::Timeout => DegradedReason::Timeout,
            SamplerError::NotSupported => DegradedReason::NotSupported,
        }
    }
}

impl DegradedReason {
    pub fn message(&self) -> &'static str {
        match self {
            DegradedReason::PermissionDenied => SamplerError::PermissionDenied.user_message(),
            DegradedReason::PositionUnavailable => {
                SamplerError::PositionUnavailable.user_message()
            }
            DegradedReason::Timeout => SamplerError::Timeout.user_message(),
            DegradedReason::NotSupported => SamplerError::NotSupported.user_message(),
            DegradedReason::RemoteWriteFailed => {
                "Could not reach the server. Location saved on this device."
            }
            DegradedReason::Offline => "You are offline. Location saved on this device.",
        }
    }
}

/// Lifecycle of a tracking session.
///
/// `Idle -> Starting -> Live <-> Degraded -> Stopped`; `Stopped` is reachable
/// from every state and a stopped session may be started again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum TrackingStatus {
    Idle,
    Starting,
    Live,
    Degraded(DegradedReason),
    Stopped,
}

/// Coarse indicator rendered by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusIndicator {
    Idle,
    Starting,
    Live,
    Degraded,
    Offline,
    Stopped,
}

impl StatusIndicator {
    pub fn label(&self) -> &'static str {
        match self {
            StatusIndicator::Idle => "Idle",
            StatusIndicator::Starting => "Starting",
            StatusIndicator::Live => "Live",
            StatusIndicator::Degraded => "Degraded",
            StatusIndicator::Offline => "Offline",
            StatusIndicator::Stopped => "Stopped",
        }
    }
}

impl TrackingStatus {
    pub fn can_transition_to(&self, next: &TrackingStatus) -> bool {
        use TrackingStatus::*;
        match (self, next) {
            (_, Stopped) => true,
            (Idle | Stopped, Starting) => true,
            (Starting, Live | Degraded(_)) => true,
            (Live, Live | Degraded(_)) => true,
            (Degraded(_), Live | Degraded(_)) => true,
            _ => false,
        }
    }

    /// Subscription running (possibly degraded).
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TrackingStatus::Starting | TrackingStatus::Live | TrackingStatus::Degraded(_)
        )
    }

    pub fn indicator(&self) -> StatusIndicator {
        match self {
            TrackingStatus::Idle => StatusIndicator::Idle,
            TrackingStatus::Starting => StatusIndicator::Starting,
            TrackingStatus::Live => StatusIndicator::Live,
            TrackingStatus::Degraded(
                DegradedReason::Offline | DegradedReason::RemoteWriteFailed,
            ) => StatusIndicator::Offline,
            TrackingStatus::Degraded(_) => StatusIndicator::Degraded,
            TrackingStatus::Stopped => StatusIndicator::Stopped,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            TrackingStatus::Idle => "Location tracking is off.",
            TrackingStatus::Starting => "Starting location tracking...",
            TrackingStatus::Live => "Sharing your live location.",
            TrackingStatus::Degraded(reason) => reason.message(),
            TrackingStatus::Stopped => "Location tracking stopped.",
        }
    }
}

impl std::fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackingStatus::Degraded(reason) => write!(f, "degraded ({reason:?})"),
            other => write!(f, "{}", other.indicator().label().to_lowercase()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> UserMeta {
        UserMeta {
            user_id: "u1".into(),
            display_name: "Asha Rao".into(),
            email: "asha@example.com".into(),
        }
    }

    #[test]
    fn test_sample_validation() {
        assert!(PositionSample::new(12.9, 77.6, Some(15.0)).is_valid());
        assert!(PositionSample::new(-90.0, 180.0, None).is_valid());
        assert!(!PositionSample::new(91.0, 0.0, None).is_valid());
        assert!(!PositionSample::new(0.0, -180.5, None).is_valid());
        assert!(!PositionSample::new(f64::NAN, 0.0, None).is_valid());
        assert!(!PositionSample::new(0.0, 0.0, Some(-1.0)).is_valid());
    }

    #[test]
    fn test_position_patch_document() {
        let sample = PositionSample::at(12.9, 77.6, Some(15.0), 1_700_000_000_000);
        let doc = LocationPatch::position(&sample, &meta()).into_document().unwrap();

        assert_eq!(doc["userId"], "u1");
        assert_eq!(doc["latitude"], 12.9);
        assert_eq!(doc["longitude"], 77.6);
        assert_eq!(doc["accuracyMeters"], 15.0);
        assert_eq!(doc["isOnline"], true);
        assert!(!doc.contains_key("lastSeenAt"));
    }

    #[test]
    fn test_offline_patch_leaves_position_alone() {
        let doc = LocationPatch::offline(Utc::now()).into_document().unwrap();
        assert_eq!(doc.len(), 2);
        assert_eq!(doc["isOnline"], false);
        assert!(doc.contains_key("lastSeenAt"));
    }

    #[test]
    fn test_record_from_position_patch() {
        let sample = PositionSample::at(12.9, 77.6, None, 1_700_000_000_000);
        let doc = LocationPatch::position(&sample, &meta()).into_document().unwrap();
        let record = LocationRecord::from_document(&doc).unwrap();

        assert_eq!(record.user_id, "u1");
        assert_eq!(record.accuracy_meters, None);
        assert_eq!(record.captured_at.timestamp_millis(), 1_700_000_000_000);
        assert!(record.is_online);
        assert!(record.last_seen_at.is_none());
    }

    #[test]
    fn test_transitions() {
        use TrackingStatus::*;
        let degraded = Degraded(DegradedReason::Timeout);

        assert!(Idle.can_transition_to(&Starting));
        assert!(Starting.can_transition_to(&Live));
        assert!(Starting.can_transition_to(&degraded));
        assert!(Live.can_transition_to(&degraded));
        assert!(degraded.can_transition_to(&Live));
        assert!(degraded.can_transition_to(&Stopped));
        assert!(Stopped.can_transition_to(&Starting));

        assert!(!Idle.can_transition_to(&Live));
        assert!(!Stopped.can_transition_to(&Live));
        assert!(!Live.can_transition_to(&Starting));
    }

    #[test]
    fn test_indicator() {
        assert_eq!(TrackingStatus::Live.indicator().label(), "Live");
        assert_eq!(
            TrackingStatus::Degraded(DegradedReason::Offline).indicator(),
            StatusIndicator::Offline
        );
        assert_eq!(
            TrackingStatus::Degraded(DegradedReason::PermissionDenied).indicator(),
            StatusIndicator::Degraded
        );
    }

    #[test]
    fn test_email_local_part() {
        assert_eq!(email_local_part("asha@example.com"), "asha");
        assert_eq!(email_local_part("plain"), "plain");
    }
}
