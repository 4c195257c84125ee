//! Configuration schema
//!
//! Every section has a `Default` so that a missing file or a partial file
//! still yields a complete configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use common::ModelReference;

/// Default upload limit: 5 MiB
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

/// Default confidence threshold below which the service abstains
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.60;

/// Complete server configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    pub model: ModelSection,
    pub store: StoreConfig,
    pub policy: PolicyConfig,
    pub timeouts: TimeoutConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

impl ServingConfig {
    /// Builds the immutable model reference used for the whole process lifetime
    pub fn model_reference(&self) -> ModelReference {
        let reference = ModelReference::new(
            self.model.bucket.clone(),
            self.model.version.clone(),
            self.model.artifact_name.clone(),
        );
        match &self.model.checksum {
            Some(checksum) if !checksum.is_empty() => reference.with_checksum(checksum.clone()),
            _ => reference,
        }
    }
}

/// Which artifact to serve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    pub bucket: String,
    pub version: String,
    pub artifact_name: String,
    /// Expected sha256 hex digest of the artifact
    pub checksum: Option<String>,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            bucket: "models".to_string(),
            version: "latest".to_string(),
            artifact_name: "model.json".to_string(),
            checksum: None,
        }
    }
}

/// Object store backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Filesystem,
    Http,
}

/// Object store and local artifact cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    /// Root directory for the filesystem store
    pub root: PathBuf,
    /// Base URL for the HTTP store, e.g. `https://bucket-host.example.com`
    pub endpoint: Option<String>,
    /// Local directory holding verified artifact copies
    pub cache_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Filesystem,
            root: PathBuf::from("./object-store"),
            endpoint: None,
            cache_dir: PathBuf::from("./artifact-cache"),
        }
    }
}

/// Request validation and decision policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub confidence_threshold: f32,
    pub max_upload_bytes: u64,
    pub allowed_media_types: Vec<String>,
    /// Upper bound on decoded width * height
    pub max_image_pixels: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_media_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/webp".to_string(),
            ],
            max_image_pixels: 40_000_000,
        }
    }
}

/// Timeouts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub artifact_fetch_secs: u64,
    /// How long a predict call waits for readiness; 0 fails fast
    pub ready_wait_ms: u64,
    pub inference_secs: u64,
    /// Value of the `Retry-After` header on not-ready responses
    pub retry_after_secs: u64,
}

impl TimeoutConfig {
    pub fn artifact_fetch(&self) -> Duration {
        Duration::from_secs(self.artifact_fetch_secs)
    }

    pub fn ready_wait(&self) -> Duration {
        Duration::from_millis(self.ready_wait_ms)
    }

    pub fn inference(&self) -> Duration {
        Duration::from_secs(self.inference_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            artifact_fetch_secs: 60,
            ready_wait_ms: 0,
            inference_secs: 30,
            retry_after_secs: 5,
        }
    }
}

/// HTTP listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    /// Socket address to bind
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parsed socket address
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.addr().parse()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Logging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
    /// Also write daily-rotated log files here
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            directory: None,
        }
    }
}
