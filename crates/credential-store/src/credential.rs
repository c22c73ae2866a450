//! The session credential and its owning store.

use crate::{SecureStorage, StorageError, StorageKeys, StorageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Access/refresh token pair with the access token's expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
        }
    }

    /// True when the access token expires within `margin` of `now`.
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        let margin = chrono::Duration::from_std(margin)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        match now.checked_add_signed(margin) {
            Some(deadline) => self.expires_at <= deadline,
            None => true,
        }
    }

    /// True when the access token is usable for at least `margin` more.
    pub fn is_fresh(&self, margin: Duration) -> bool {
        !self.expires_within(margin, Utc::now())
    }
}

/// Owner of the single live [`Credential`].
///
/// The credential is stored as one JSON record, so `replace` swaps both
/// tokens together and `clear` removes both together.
pub struct CredentialStore {
    storage: Box<dyn SecureStorage>,
}

impl CredentialStore {
    /// Create a new store over the given storage backend.
    pub fn new(storage: Box<dyn SecureStorage>) -> Self {
        Self { storage }
    }

    /// Load the stored credential, if any.
    ///
    /// A record that cannot be decoded is reported as
    /// [`StorageError::Encoding`]; callers treat it as a malformed session.
    pub fn load(&self) -> StorageResult<Option<Credential>> {
        let Some(raw) = self.storage.get(StorageKeys::SESSION_CREDENTIAL)? else {
            return Ok(None);
        };

        serde_json::from_str(&raw).map(Some).map_err(|e| {
            warn!(error = %e, "stored credential is malformed");
            StorageError::Encoding(e.to_string())
        })
    }

    /// Replace the stored credential.
    pub fn replace(&self, credential: &Credential) -> StorageResult<()> {
        let raw = serde_json::to_string(credential)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;
        self.storage.set(StorageKeys::SESSION_CREDENTIAL, &raw)?;
        debug!(expires_at = %credential.expires_at, "credential replaced");
        Ok(())
    }

    /// Remove the stored credential. Returns whether one existed.
    pub fn clear(&self) -> StorageResult<bool> {
        let existed = self.storage.delete(StorageKeys::SESSION_CREDENTIAL)?;
        if existed {
            debug!("credential cleared");
        }
        Ok(existed)
    }

    /// Whether any credential record exists (malformed or not).
    pub fn has_credential(&self) -> StorageResult<bool> {
        self.storage.has(StorageKeys::SESSION_CREDENTIAL)
    }
}
