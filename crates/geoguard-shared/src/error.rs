use thiserror::Error;

/// Failures reported by a position source.
///
/// Only [`SamplerError::PermissionDenied`] ends a subscription; every other
/// variant is transient and the subscription keeps delivering once the
/// device recovers.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location information unavailable")]
    PositionUnavailable,

    #[error("Location request timed out")]
    Timeout,

    #[error("Geolocation is not supported on this device")]
    NotSupported,
}

impl SamplerError {
    /// Whether the subscription is dead until it is explicitly restarted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SamplerError::PermissionDenied)
    }

    /// Status line shown to the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            SamplerError::PermissionDenied => {
                "Location permission denied. Please enable it in your device settings."
            }
            SamplerError::PositionUnavailable => "Location information unavailable.",
            SamplerError::Timeout => "Location request timed out.",
            SamplerError::NotSupported => "Geolocation is not supported on this device.",
        }
    }
}

/// Failures talking to the shared document store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication expired")]
    AuthExpired,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Quota exceeded")]
    Quota,

    #[error("Store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid document: {0}")]
    InvalidDocument(String),
}

impl RemoteError {
    /// Whether the failure is a connectivity problem rather than a refusal.
    pub fn is_network(&self) -> bool {
        matches!(self, RemoteError::Network(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_permission_denied_is_terminal() {
        assert!(SamplerError::PermissionDenied.is_terminal());
        assert!(!SamplerError::PositionUnavailable.is_terminal());
        assert!(!SamplerError::Timeout.is_terminal());
        assert!(!SamplerError::NotSupported.is_terminal());
    }

    #[test]
    fn test_user_messages_are_distinct() {
        let all = [
            SamplerError::PermissionDenied,
            SamplerError::PositionUnavailable,
            SamplerError::Timeout,
            SamplerError::NotSupported,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.user_message(), b.user_message());
            }
        }
    }
}
