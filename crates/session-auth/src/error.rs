//! Authentication error types.

use session_config::FailureKind;
use thiserror::Error;

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// No credential is stored
    #[error("Not logged in")]
    NotLoggedIn,

    /// The refresh round failed; the session has been cleared
    #[error("Session expired")]
    SessionExpired,

    /// The server rejected a freshly refreshed token as well
    #[error("Authorization revoked")]
    AuthorizationRevoked,

    /// Authenticated but not allowed (403)
    #[error("Forbidden")]
    Forbidden,

    /// Login or registration rejected by the API
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Access token could not be decoded or lacks required claims
    #[error("Invalid token claims: {0}")]
    InvalidClaims(String),

    /// Non-success response from an auth endpoint
    #[error("API error: HTTP {status}: {body}")]
    Api { status: u16, body: String },

    /// Invalid state transition in the auth FSM
    #[error("Invalid auth state transition: {0}")]
    InvalidStateTransition(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] credential_store::StorageError),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Network unavailable (transient error, can retry)
    #[error("Network unavailable")]
    NetworkUnavailable,
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be retried.
    ///
    /// Transient errors include:
    /// - Network unavailable
    /// - HTTP errors with 5xx status codes
    /// - Connection timeouts
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::NetworkUnavailable => true,
            AuthError::Timeout => true,
            AuthError::Api { status, .. } => (500..600).contains(status),
            AuthError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    return true;
                }
                if let Some(status) = e.status() {
                    return status.is_server_error();
                }
                false
            }
            _ => false,
        }
    }

    /// Map this error onto the session-layer failure taxonomy.
    pub fn kind(&self) -> FailureKind {
        match self {
            AuthError::NotLoggedIn
            | AuthError::SessionExpired
            | AuthError::AuthorizationRevoked => FailureKind::SessionExpired,
            AuthError::Forbidden => FailureKind::ForbiddenAction,
            AuthError::Api { status: 401, .. } => FailureKind::AuthorizationExpired,
            AuthError::Api { status: 403, .. } => FailureKind::ForbiddenAction,
            e if e.is_transient() => FailureKind::TransientNetworkFailure,
            _ => FailureKind::Other,
        }
    }

    /// Whether the boundary should route the user to login.
    pub fn requires_login(&self) -> bool {
        self.kind().requires_login()
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
