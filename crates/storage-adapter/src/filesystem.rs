//! Filesystem-backed object store
//!
//! Objects live at `<root>/<bucket>/<key>`. Useful for local development and
//! for stores mounted into the container.

use std::io::ErrorKind;
use std::path::PathBuf;
use async_trait::async_trait;
use tracing::debug;

use crate::store::{check_key, ObjectStore, StorageError, StoredObject};

/// Object store reading from a local directory tree
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key)
    }
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<StoredObject, StorageError> {
        check_key(bucket, key)?;
        let path = self.object_path(bucket, key);
        debug!("Reading object from {}", path.display());

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(StoredObject::new(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(StorageError::Transport(format!("Failed to read {}: {}", path.display(), e))),
        }
    }

    fn describe(&self) -> String {
        format!("filesystem:{}", self.root.display())
    }
}
