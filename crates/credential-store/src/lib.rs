//! Credential persistence for the forms session layer.
//!
//! Two storage backends are provided:
//! - **memory**: process-local map, used for tests and ephemeral sessions
//! - **file**: JSON map on disk, used by the CLI to keep a session across runs
//!
//! [`CredentialStore`] sits on top of either backend and owns the single
//! live [`Credential`].

mod credential;
mod file;
mod keys;
mod memory;
mod traits;

pub use credential::{Credential, CredentialStore};
pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use traits::SecureStorage;

use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend-specific storage error (for storage implementations outside this crate)
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();

        storage.set("test_key", "test_value").unwrap();
        assert_eq!(
            storage.get("test_key").unwrap(),
            Some("test_value".to_string())
        );

        assert!(storage.has("test_key").unwrap());
        assert!(!storage.has("nonexistent").unwrap());

        assert!(storage.delete("test_key").unwrap());
        assert!(!storage.delete("test_key").unwrap());
        assert_eq!(storage.get("test_key").unwrap(), None);
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::Encoding("bad json".to_string());
        assert_eq!(err.to_string(), "Encoding error: bad json");
    }
}
