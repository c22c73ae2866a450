//! Storage key constants.

/// Storage keys used by the session layer.
pub struct StorageKeys;

impl StorageKeys {
    /// Current credential (JSON: access token, refresh token, expiry).
    ///
    /// Both tokens live under one key so that replacing them is a single write.
    pub const SESSION_CREDENTIAL: &'static str = "session_credential";
}
