//! Object store access for model artifacts
//!
//! The serving core needs exactly one thing from the object store: read a key
//! and either get its bytes or learn that it is absent. This crate defines
//! that capability and provides filesystem, HTTP and in-memory backends.

pub mod store;
pub mod filesystem;
pub mod http;
pub mod memory;

use std::sync::Arc;

use serving_config::{StoreConfig, StoreKind};

// Re-export commonly used types
pub use store::{ObjectStore, StorageError, StoredObject};
pub use filesystem::FilesystemStore;
pub use http::HttpStore;
pub use memory::MemoryStore;

/// Builds the configured object store
pub fn build(config: &StoreConfig) -> Result<Arc<dyn ObjectStore>, StorageError> {
    match config.kind {
        StoreKind::Filesystem => Ok(Arc::new(FilesystemStore::new(config.root.clone()))),
        StoreKind::Http => {
            let endpoint = config
                .endpoint
                .as_deref()
                .ok_or_else(|| StorageError::Transport("store.endpoint is not set".to_string()))?;
            Ok(Arc::new(HttpStore::new(endpoint)?))
        }
    }
}
