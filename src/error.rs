//! Error Types
//!
//! Every fallible operation in StashKV returns [`StoreError`]. The variants map
//! onto how the caller is expected to react:
//!
//! - [`StoreError::Validation`] and [`StoreError::Configuration`] are caller
//!   mistakes. They are raised before any state changes and never retried.
//! - [`StoreError::Concurrency`] means a synchronous save collided with an
//!   asynchronous one that is still writing.
//! - [`StoreError::Persistence`] and [`StoreError::Integrity`] come from the
//!   filesystem or from corrupt bytes. On load any failure triggers one
//!   recovery attempt from the backup file; [`StoreError::BackupCorrupted`]
//!   means that attempt failed too.
//!
//! `StoreError` is `Clone`: the outcome of a single in-flight write is handed
//! to every caller that joined it, and errors also travel inside
//! [`Event::Error`](crate::events::Event::Error) notifications. Underlying
//! sources are therefore kept behind an `Arc`.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors produced by the store, the persistence manager and the codec.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    /// Malformed key, TTL or batch operation
    #[error("validation error: {0}")]
    Validation(String),

    /// Invalid store configuration (e.g. encryption without a key)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A synchronous save was attempted while an asynchronous save is in flight
    #[error("concurrency error: {0}")]
    Concurrency(String),

    /// Filesystem failure while reading or writing the store file
    #[error("persistence error: {context} ({path}): {source}")]
    Persistence {
        context: String,
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// Load failed on both the main file and its backup
    #[error("persistence error: backup {path} is also unreadable: {reason}")]
    BackupCorrupted { path: PathBuf, reason: Box<StoreError> },

    /// Stored bytes could not be decoded (bad ciphertext, bad gzip, bad JSON)
    #[error("integrity error: {0}")]
    Integrity(String),
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Wraps an I/O error with the operation and path it failed on.
    pub fn io(context: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Persistence {
            context: context.into(),
            path: path.into(),
            source: Arc::new(source),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Integrity(format!("malformed document: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let err = StoreError::io(
            "failed to rename temp file",
            "/tmp/store.json",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        let msg = err.to_string();
        assert!(msg.contains("failed to rename temp file"));
        assert!(msg.contains("/tmp/store.json"));
        assert!(msg.contains("gone"));
    }

    #[test]
    fn test_errors_are_cloneable() {
        let err = StoreError::io(
            "read",
            "a.json",
            std::io::Error::new(std::io::ErrorKind::Other, "disk"),
        );
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }

    #[test]
    fn test_json_errors_are_integrity_errors() {
        let err: StoreError = serde_json::from_str::<serde_json::Value>("{nope")
            .unwrap_err()
            .into();
        assert!(matches!(err, StoreError::Integrity(_)));
    }
}
