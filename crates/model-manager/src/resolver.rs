//! Artifact resolver implementation
//!
//! This module fetches a versioned model artifact and its metadata sidecar from
//! the object store into a verified local cache. Resolution is cached by
//! reference: once a complete, checksum-valid copy is on disk, resolving the
//! same reference again makes no store calls.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use common::utils::{execute_with_timeout, format_bytes};
use common::{ArtifactMetadata, ModelReference, Result, ServingError, METADATA_FILE_NAME};
use storage_adapter::{ObjectStore, StorageError};

use crate::metadata::parse_metadata;

/// A verified local copy of an artifact plus its parsed sidecar
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedArtifact {
    pub reference: ModelReference,
    /// Local path of the serialized model
    pub artifact_path: PathBuf,
    pub metadata: ArtifactMetadata,
    /// sha256 hex digest of the artifact bytes
    pub sha256: String,
    pub size_bytes: u64,
    /// True if no store call was needed
    pub from_cache: bool,
}

/// Resolves model references into local, verified artifacts
pub struct ArtifactResolver {
    /// Object store
    store: Arc<dyn ObjectStore>,

    /// Local cache root
    cache_dir: PathBuf,

    /// Upper bound on one resolution, cache check included
    fetch_timeout: Duration,

    /// Serializes resolutions so temp files are never shared
    resolve_lock: Mutex<()>,
}

impl ArtifactResolver {
    /// Creates a new artifact resolver
    pub fn new(store: Arc<dyn ObjectStore>, cache_dir: impl Into<PathBuf>, fetch_timeout: Duration) -> Self {
        Self {
            store,
            cache_dir: cache_dir.into(),
            fetch_timeout,
            resolve_lock: Mutex::new(()),
        }
    }

    /// Local directory holding the cached copy of `reference`
    pub fn cache_dir_for(&self, reference: &ModelReference) -> PathBuf {
        self.cache_dir.join(&reference.bucket).join(&reference.version)
    }

    /// Resolves `reference`, fetching only what the cache cannot supply
    pub async fn resolve(&self, reference: &ModelReference) -> Result<ResolvedArtifact> {
        let _lock = self.resolve_lock.lock().await;
        execute_with_timeout(
            self.resolve_locked(reference),
            self.fetch_timeout,
            "artifact resolution",
            ServingError::ArtifactTransport,
        )
        .await
    }

    async fn resolve_locked(&self, reference: &ModelReference) -> Result<ResolvedArtifact> {
        let dir = self.cache_dir_for(reference);
        let artifact_path = dir.join(&reference.artifact_name);
        let metadata_path = dir.join(METADATA_FILE_NAME);

        if let Some(cached) = self.try_cached(reference, &artifact_path, &metadata_path).await? {
            info!(
                "Using cached artifact {} ({}, sha256 {})",
                reference,
                format_bytes(cached.size_bytes),
                cached.sha256
            );
            return Ok(cached);
        }

        info!("Fetching artifact {} from {}", reference, self.store.describe());

        let metadata_bytes = self.fetch(reference, &reference.metadata_key()).await?;
        let metadata = parse_metadata(&metadata_bytes, reference)?;

        let artifact_bytes = self.fetch(reference, &reference.artifact_key()).await?;
        let sha256 = sha256_hex(&artifact_bytes);
        verify_checksum(reference, &sha256)?;

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| cache_error(&dir, e))?;

        // The sidecar is written last: its presence marks a complete copy.
        write_atomic(&artifact_path, &artifact_bytes).await?;
        write_atomic(&metadata_path, &metadata_bytes).await?;

        info!(
            "Artifact {} fetched ({}, sha256 {})",
            reference,
            format_bytes(artifact_bytes.len() as u64),
            sha256
        );

        Ok(ResolvedArtifact {
            reference: reference.clone(),
            artifact_path,
            metadata,
            sha256,
            size_bytes: artifact_bytes.len() as u64,
            from_cache: false,
        })
    }

    /// Returns the cached copy if it is complete and still valid
    async fn try_cached(
        &self,
        reference: &ModelReference,
        artifact_path: &Path,
        metadata_path: &Path,
    ) -> Result<Option<ResolvedArtifact>> {
        if !(artifact_path.is_file() && metadata_path.is_file()) {
            debug!("No complete cached copy of {}", reference);
            return Ok(None);
        }

        let artifact_bytes = tokio::fs::read(artifact_path)
            .await
            .map_err(|e| cache_error(artifact_path, e))?;
        let metadata_bytes = tokio::fs::read(metadata_path)
            .await
            .map_err(|e| cache_error(metadata_path, e))?;

        let sha256 = sha256_hex(&artifact_bytes);
        if let Err(e) = verify_checksum(reference, &sha256) {
            warn!("Discarding cached copy of {}: {}", reference, e);
            self.evict(artifact_path, metadata_path).await;
            return Ok(None);
        }

        let metadata = match parse_metadata(&metadata_bytes, reference) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Discarding cached copy of {}: {}", reference, e);
                self.evict(artifact_path, metadata_path).await;
                return Ok(None);
            }
        };

        Ok(Some(ResolvedArtifact {
            reference: reference.clone(),
            artifact_path: artifact_path.to_path_buf(),
            metadata,
            sha256,
            size_bytes: artifact_bytes.len() as u64,
            from_cache: true,
        }))
    }

    async fn evict(&self, artifact_path: &Path, metadata_path: &Path) {
        for path in [metadata_path, artifact_path] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to evict cached file {}: {}", path.display(), e),
            }
        }
    }

    async fn fetch(&self, reference: &ModelReference, key: &str) -> Result<bytes::Bytes> {
        match self.store.get(&reference.bucket, key).await {
            Ok(object) => {
                debug!(
                    key,
                    etag = ?object.etag,
                    "Fetched {} from store",
                    format_bytes(object.len() as u64)
                );
                Ok(object.bytes)
            }
            Err(StorageError::NotFound { bucket, key }) => Err(ServingError::ArtifactUnavailable(format!(
                "{}/{} does not exist in {}",
                bucket,
                key,
                self.store.describe()
            ))),
            Err(StorageError::Transport(msg)) => Err(ServingError::ArtifactTransport(msg)),
        }
    }
}

/// Lowercase sha256 hex digest
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn verify_checksum(reference: &ModelReference, actual: &str) -> Result<()> {
    match &reference.checksum {
        Some(expected) if !expected.eq_ignore_ascii_case(actual) => Err(ServingError::ArtifactCorrupt(format!(
            "Checksum verification failed for {}: expected {}, got {}",
            reference, expected, actual
        ))),
        _ => Ok(()),
    }
}

/// Writes to a sibling `.download` file, then renames it into place
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!("{}.download", file_name));

    let result = async {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(cache_error(path, e));
    }
    Ok(())
}

fn cache_error(path: &Path, e: std::io::Error) -> ServingError {
    ServingError::ArtifactTransport(format!("Local artifact cache error at {}: {}", path.display(), e))
}
