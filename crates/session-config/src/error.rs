//! Core error types.

use thiserror::Error;

/// Error type for configuration and filesystem operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Path error (e.g., home directory not found)
    #[error("Path error: {0}")]
    Path(String),
}

/// Result type alias using CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

/// Coarse classification of session-layer failures.
///
/// Every crate maps its own error enum onto this so the application boundary
/// can decide between "retry", "send the user to login" and "degrade quietly"
/// without matching on crate-specific variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Connect error, timeout or 5xx; a single retry is reasonable.
    TransientNetworkFailure,
    /// The access token was rejected; a coordinated refresh may fix it.
    AuthorizationExpired,
    /// The session is gone (refresh rejected, revoked, or never logged in).
    SessionExpired,
    /// The user is authenticated but not allowed to do this.
    ForbiddenAction,
    /// A realtime topic join failed; retried on the next reconnect.
    SubscriptionJoinFailed,
    /// The realtime channel is down; live updates are unavailable.
    ConnectionUnavailable,
    /// Local failure (storage, configuration, encoding).
    Other,
}

impl FailureKind {
    /// Whether the boundary should route the user to the login entry point.
    pub fn requires_login(self) -> bool {
        matches!(self, FailureKind::SessionExpired | FailureKind::ForbiddenAction)
    }
}
