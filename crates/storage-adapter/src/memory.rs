//! In-memory object store

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::store::{ObjectStore, StorageError, StoredObject};

/// Object store held in memory, with per-key fetch counters
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: DashMap<(String, String), StoredObject>,
    fetches: DashMap<String, Arc<AtomicUsize>>,
    failing: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an object, replacing any previous value
    pub fn put(&self, bucket: &str, key: &str, bytes: impl Into<Bytes>) {
        self.objects
            .insert((bucket.to_string(), key.to_string()), StoredObject::new(bytes));
    }

    /// Removes an object
    pub fn remove(&self, bucket: &str, key: &str) {
        self.objects.remove(&(bucket.to_string(), key.to_string()));
    }

    /// Makes every read of `key` fail with a transport error
    pub fn fail_key(&self, key: &str, message: &str) {
        self.failing.insert(key.to_string(), message.to_string());
    }

    /// Clears an injected failure
    pub fn heal_key(&self, key: &str) {
        self.failing.remove(key);
    }

    /// Number of `get` calls made for `key`, whatever their outcome
    pub fn fetch_count(&self, key: &str) -> usize {
        self.fetches
            .get(key)
            .map(|count| count.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<StoredObject, StorageError> {
        self.fetches
            .entry(key.to_string())
            .or_default()
            .fetch_add(1, Ordering::SeqCst);

        if let Some(message) = self.failing.get(key) {
            return Err(StorageError::Transport(message.clone()));
        }

        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|object| object.clone())
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    fn describe(&self) -> String {
        format!("memory:{} objects", self.objects.len())
    }
}
