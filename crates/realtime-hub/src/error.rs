//! Realtime error types.

use session_config::FailureKind;
use thiserror::Error;

/// Realtime error type.
///
/// Cloneable because one connection attempt's outcome is handed to every
/// caller that coalesced onto it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RealtimeError {
    /// No live connection, or the attempt to open one failed
    #[error("Realtime connection unavailable: {0}")]
    ConnectionUnavailable(String),

    /// Transport-level failure (socket, handshake, framing)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The access token source could not produce a token
    #[error("Access token unavailable: {0}")]
    AccessToken(String),

    /// Server rejected or failed a group join
    #[error("Failed to join topic {topic}: {reason}")]
    SubscriptionJoinFailed { topic: String, reason: String },

    /// Server rejected or failed a group leave
    #[error("Failed to leave topic {topic}: {reason}")]
    SubscriptionLeaveFailed { topic: String, reason: String },

    /// The manager was stopped while the operation was pending
    #[error("Realtime connection stopped")]
    Stopped,

    /// Invocation arguments did not match the expected payload shape
    #[error("Invalid {event} payload: {reason}")]
    Payload { event: String, reason: String },

    /// Hub invocation timed out
    #[error("Hub invocation timed out")]
    Timeout,
}

impl RealtimeError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RealtimeError::ConnectionUnavailable(_)
            | RealtimeError::Transport(_)
            | RealtimeError::AccessToken(_)
            | RealtimeError::Stopped
            | RealtimeError::Timeout => FailureKind::ConnectionUnavailable,
            RealtimeError::SubscriptionJoinFailed { .. } => FailureKind::SubscriptionJoinFailed,
            RealtimeError::SubscriptionLeaveFailed { .. } | RealtimeError::Payload { .. } => {
                FailureKind::Other
            }
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RealtimeError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        RealtimeError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(e: serde_json::Error) -> Self {
        RealtimeError::Transport(format!("malformed hub message: {e}"))
    }
}

/// Result type alias using RealtimeError.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            RealtimeError::Stopped.kind(),
            FailureKind::ConnectionUnavailable
        );
        assert_eq!(
            RealtimeError::SubscriptionJoinFailed {
                topic: "tmpl-1".into(),
                reason: "boom".into()
            }
            .kind(),
            FailureKind::SubscriptionJoinFailed
        );
        assert!(!RealtimeError::Timeout.kind().requires_login());
    }

    #[test]
    fn test_display_names_topic() {
        let err = RealtimeError::SubscriptionLeaveFailed {
            topic: "tmpl-9".into(),
            reason: "not connected".into(),
        };
        assert_eq!(err.to_string(), "Failed to leave topic tmpl-9: not connected");
    }
}
