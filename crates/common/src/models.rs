//! Common data models for image serving
//!
//! This module defines the data model shared by the resolver, the lifecycle
//! manager, the preprocessing pipeline and the request orchestrator.

use std::collections::HashSet;
use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, ServingError};

/// Label returned in place of a class name when confidence is below threshold
pub const ABSTAIN_LABEL: &str = "Uncertain";

/// File name of the metadata sidecar stored next to every artifact
pub const METADATA_FILE_NAME: &str = "metadata.json";

/// Identifies one versioned model artifact in the object store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelReference {
    /// Store location (bucket or top-level directory)
    pub bucket: String,
    /// Version tag, e.g. `v3`
    pub version: String,
    /// File name of the serialized model under the version prefix
    pub artifact_name: String,
    /// Optional lowercase sha256 hex digest of the artifact bytes
    pub checksum: Option<String>,
}

impl ModelReference {
    /// Creates a reference without an integrity checksum
    pub fn new(bucket: impl Into<String>, version: impl Into<String>, artifact_name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            version: version.into(),
            artifact_name: artifact_name.into(),
            checksum: None,
        }
    }

    /// Attaches an expected sha256 checksum
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into().to_lowercase());
        self
    }

    /// Store key of the serialized model: `models/<version>/<artifact-name>`
    pub fn artifact_key(&self) -> String {
        format!("models/{}/{}", self.version, self.artifact_name)
    }

    /// Store key of the metadata sidecar: `models/<version>/metadata.json`
    pub fn metadata_key(&self) -> String {
        format!("models/{}/{}", self.version, METADATA_FILE_NAME)
    }
}

impl fmt::Display for ModelReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.artifact_key())
    }
}

/// Readiness state of the single serving model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServingState {
    /// Nothing has been loaded yet
    Uninitialized,
    /// A load is in flight
    Loading,
    /// A model is loaded and serving
    Ready,
    /// The last load attempt failed
    Failed,
}

impl ServingState {
    /// Returns true if requests may reach inference
    pub fn is_ready(&self) -> bool {
        matches!(self, ServingState::Ready)
    }
}

impl fmt::Display for ServingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServingState::Uninitialized => write!(f, "Uninitialized"),
            ServingState::Loading => write!(f, "Loading"),
            ServingState::Ready => write!(f, "Ready"),
            ServingState::Failed => write!(f, "Failed"),
        }
    }
}

impl Default for ServingState {
    fn default() -> Self {
        ServingState::Uninitialized
    }
}

/// Decided label of a prediction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Label {
    /// A concrete class from the model's label set
    Class(String),
    /// Confidence was below threshold
    Abstain,
}

impl Label {
    /// Returns the wire representation of the label
    pub fn as_str(&self) -> &str {
        match self {
            Label::Class(name) => name,
            Label::Abstain => ABSTAIN_LABEL,
        }
    }

    /// Returns true if the label is the abstain sentinel
    pub fn is_abstain(&self) -> bool {
        matches!(self, Label::Abstain)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Label {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Label {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        if name == ABSTAIN_LABEL {
            Ok(Label::Abstain)
        } else {
            Ok(Label::Class(name))
        }
    }
}

/// Outcome of a single prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Class name or the abstain sentinel
    pub label: Label,
    /// Maximum of the normalized score distribution, in [0, 1]
    pub confidence: f32,
    /// Normalized scores, one per class in label order
    pub raw_scores: Vec<f32>,
}

/// Resampling filter used when resizing to the model input resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeFilter {
    Nearest,
    #[serde(alias = "triangle")]
    Bilinear,
    #[serde(alias = "catmullrom")]
    Bicubic,
    #[serde(alias = "lanczos")]
    Lanczos3,
}

impl Default for ResizeFilter {
    fn default() -> Self {
        ResizeFilter::Bilinear
    }
}

/// Training-time input transform, versioned with the artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformSpec {
    /// Input height in pixels
    pub height: u32,
    /// Input width in pixels
    pub width: u32,
    /// Per-channel mean in RGB order, applied after scaling to [0, 1]
    pub mean: [f32; 3],
    /// Per-channel standard deviation in RGB order
    pub std: [f32; 3],
    #[serde(default)]
    pub resize_filter: ResizeFilter,
}

impl TransformSpec {
    /// Tensor shape produced by this transform: `[3, H, W]`
    pub fn input_shape(&self) -> [usize; 3] {
        [3, self.height as usize, self.width as usize]
    }

    /// Checks that the transform can be applied
    pub fn validate(&self) -> Result<()> {
        if self.height == 0 || self.width == 0 {
            return Err(ServingError::ModelLoad(format!(
                "Input resolution must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.std.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(ServingError::ModelLoad(format!(
                "Normalization std must be positive, got {:?}",
                self.std
            )));
        }
        if self.mean.iter().any(|m| !m.is_finite()) {
            return Err(ServingError::ModelLoad(format!(
                "Normalization mean must be finite, got {:?}",
                self.mean
            )));
        }
        Ok(())
    }
}

/// Contents of the `metadata.json` sidecar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Backend architecture used to deserialize the artifact
    pub architecture: String,
    /// Number of output classes
    pub num_classes: usize,
    #[serde(default)]
    pub trained_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub val_accuracy: Option<f32>,
    /// Store key of the artifact this sidecar describes
    #[serde(default)]
    pub artifact_key: String,
    /// Ordered class names
    pub labels: Vec<String>,
    /// Input transform applied during training
    pub transform: TransformSpec,
}

impl ArtifactMetadata {
    /// Validates internal consistency of the sidecar
    pub fn validate(&self) -> Result<()> {
        if self.architecture.trim().is_empty() {
            return Err(ServingError::ModelLoad("Metadata has an empty architecture".to_string()));
        }
        if self.num_classes < 2 {
            return Err(ServingError::ModelLoad(format!(
                "A classifier needs at least 2 classes, metadata declares {}",
                self.num_classes
            )));
        }
        if self.labels.len() != self.num_classes {
            return Err(ServingError::ModelLoad(format!(
                "Metadata declares {} classes but lists {} labels",
                self.num_classes,
                self.labels.len()
            )));
        }

        let mut seen = HashSet::new();
        for label in &self.labels {
            if label.trim().is_empty() {
                return Err(ServingError::ModelLoad("Metadata contains an empty label".to_string()));
            }
            if label == ABSTAIN_LABEL {
                return Err(ServingError::ModelLoad(format!(
                    "Label '{}' collides with the abstain sentinel",
                    label
                )));
            }
            if !seen.insert(label.as_str()) {
                return Err(ServingError::ModelLoad(format!("Duplicate label '{}'", label)));
            }
        }

        self.transform.validate()
    }
}
