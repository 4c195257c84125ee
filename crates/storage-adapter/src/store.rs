//! Object store capability

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Bytes of one stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Object contents, byte-exact
    pub bytes: Bytes,
    /// Entity tag reported by the store, if any
    pub etag: Option<String>,
}

impl StoredObject {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            etag: None,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Error returned by an object store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The object does not exist
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Network, permission or filesystem fault
    #[error("Storage transport error: {0}")]
    Transport(String),
}

impl StorageError {
    /// Returns true if the error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Read-by-key access to an object store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetches the object stored under `bucket`/`key`
    async fn get(&self, bucket: &str, key: &str) -> Result<StoredObject, StorageError>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// Rejects keys that could escape the bucket
pub(crate) fn check_key(bucket: &str, key: &str) -> Result<(), StorageError> {
    let invalid = |s: &str| s.is_empty() || s.starts_with('/') || s.split('/').any(|part| part == "..");
    if invalid(bucket) || invalid(key) || bucket.contains('/') {
        return Err(StorageError::Transport(format!("Invalid object path: {}/{}", bucket, key)));
    }
    Ok(())
}
