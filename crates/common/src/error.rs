//! Error types for the common crate
//!
//! This module defines the serving error taxonomy shared by every crate in the
//! workspace. Each variant maps to a stable [`ErrorCode`] so that callers can
//! branch on the discriminant instead of parsing messages.

use std::fmt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for serving operations
pub type Result<T> = std::result::Result<T, ServingError>;

/// Error type for serving operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServingError {
    /// The remote artifact (or its metadata sidecar) does not exist
    #[error("Artifact unavailable: {0}")]
    ArtifactUnavailable(String),

    /// Checksum mismatch or sidecar describing a different artifact
    #[error("Artifact corrupt: {0}")]
    ArtifactCorrupt(String),

    /// Network or storage fault while fetching an artifact
    #[error("Artifact transport error: {0}")]
    ArtifactTransport(String),

    /// The artifact was fetched but could not be turned into a model
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// The model is not ready to serve yet
    #[error("Model not ready: {0}")]
    NotReady(String),

    /// The last load attempt failed and no reload has succeeded since
    #[error("Model load failed: {0}")]
    LoadFailed(String),

    /// Upload exceeds the configured size limit
    #[error("Payload too large: {size} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge {
        /// Bytes received (or declared) so far
        size: u64,
        /// Configured maximum
        limit: u64,
    },

    /// Declared media type is not in the allow-list
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// Bytes do not decode as a supported image
    #[error("Corrupt image: {0}")]
    CorruptImage(String),

    /// Backend fault during a forward pass
    #[error("Inference error: {0}")]
    Inference(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable machine-readable discriminant for a [`ServingError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ArtifactUnavailable,
    ArtifactCorrupt,
    ArtifactTransportError,
    ModelLoadError,
    NotReady,
    LoadFailed,
    PayloadTooLarge,
    UnsupportedMediaType,
    CorruptImage,
    InferenceError,
    ConfigError,
    InternalError,
}

impl ErrorCode {
    /// Returns the wire representation of the code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ArtifactUnavailable => "ARTIFACT_UNAVAILABLE",
            ErrorCode::ArtifactCorrupt => "ARTIFACT_CORRUPT",
            ErrorCode::ArtifactTransportError => "ARTIFACT_TRANSPORT_ERROR",
            ErrorCode::ModelLoadError => "MODEL_LOAD_ERROR",
            ErrorCode::NotReady => "NOT_READY",
            ErrorCode::LoadFailed => "LOAD_FAILED",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::UnsupportedMediaType => "UNSUPPORTED_MEDIA_TYPE",
            ErrorCode::CorruptImage => "CORRUPT_IMAGE",
            ErrorCode::InferenceError => "INFERENCE_ERROR",
            ErrorCode::ConfigError => "CONFIG_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is responsible for an error, as seen by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself was invalid; retrying it unchanged will not help
    Client,
    /// The service cannot answer right now; retry later
    Unavailable,
    /// The service failed while handling a valid request
    Server,
}

impl ServingError {
    /// Returns the stable discriminant for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            ServingError::ArtifactUnavailable(_) => ErrorCode::ArtifactUnavailable,
            ServingError::ArtifactCorrupt(_) => ErrorCode::ArtifactCorrupt,
            ServingError::ArtifactTransport(_) => ErrorCode::ArtifactTransportError,
            ServingError::ModelLoad(_) => ErrorCode::ModelLoadError,
            ServingError::NotReady(_) => ErrorCode::NotReady,
            ServingError::LoadFailed(_) => ErrorCode::LoadFailed,
            ServingError::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            ServingError::UnsupportedMediaType(_) => ErrorCode::UnsupportedMediaType,
            ServingError::CorruptImage(_) => ErrorCode::CorruptImage,
            ServingError::Inference(_) => ErrorCode::InferenceError,
            ServingError::Config(_) => ErrorCode::ConfigError,
            ServingError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Returns the responsibility class for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServingError::PayloadTooLarge { .. }
            | ServingError::UnsupportedMediaType(_)
            | ServingError::CorruptImage(_) => ErrorKind::Client,
            ServingError::NotReady(_) | ServingError::LoadFailed(_) => ErrorKind::Unavailable,
            _ => ErrorKind::Server,
        }
    }

    /// Returns true if the error was caused by the request payload
    pub fn is_client_error(&self) -> bool {
        self.kind() == ErrorKind::Client
    }

    /// Returns true if the caller should retry later
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Unavailable
    }
}

impl From<std::io::Error> for ServingError {
    fn from(e: std::io::Error) -> Self {
        ServingError::Internal(format!("IO error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        let err = ServingError::PayloadTooLarge { size: 10, limit: 5 };
        assert_eq!(err.code().as_str(), "PAYLOAD_TOO_LARGE");
        assert_eq!(
            serde_json::to_string(&ErrorCode::ArtifactTransportError).unwrap(),
            "\"ARTIFACT_TRANSPORT_ERROR\""
        );
        assert_eq!(ServingError::Inference("x".into()).code().to_string(), "INFERENCE_ERROR");
    }

    #[test]
    fn test_serde_and_as_str_agree() {
        let codes = [
            ErrorCode::ArtifactUnavailable,
            ErrorCode::ArtifactCorrupt,
            ErrorCode::ModelLoadError,
            ErrorCode::NotReady,
            ErrorCode::LoadFailed,
            ErrorCode::UnsupportedMediaType,
            ErrorCode::CorruptImage,
            ErrorCode::ConfigError,
            ErrorCode::InternalError,
        ];
        for code in codes {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json.trim_matches('"'), code.as_str());
        }
    }

    #[test]
    fn test_kinds() {
        assert!(ServingError::CorruptImage("bad".into()).is_client_error());
        assert!(ServingError::UnsupportedMediaType("text/plain".into()).is_client_error());
        assert!(ServingError::NotReady("loading".into()).is_retryable());
        assert!(!ServingError::Inference("boom".into()).is_retryable());
        assert_eq!(ServingError::Inference("boom".into()).kind(), ErrorKind::Server);
        assert_eq!(ServingError::ArtifactCorrupt("sha".into()).kind(), ErrorKind::Server);
    }
}
