//! Model loader implementation
//!
//! This module turns a resolved artifact into an in-memory model handle. File
//! reads and deserialization run on the blocking pool so a large artifact never
//! stalls the async runtime.

use std::fmt;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use common::{ArtifactMetadata, ModelReference, Result, ServingError, TransformSpec};

use crate::backend::{BackendRegistry, Classifier};
use crate::resolver::ResolvedArtifact;

/// Memory representation of a loaded model
pub struct LoadedModel {
    /// Reference the model was loaded from
    pub reference: ModelReference,

    /// Parsed metadata sidecar
    pub metadata: ArtifactMetadata,

    /// sha256 of the artifact bytes
    pub sha256: String,

    /// Load timestamp
    pub loaded_at: DateTime<Utc>,

    classifier: Arc<dyn Classifier>,
}

impl LoadedModel {
    /// Assembles a model from already validated parts
    pub fn from_parts(
        reference: ModelReference,
        metadata: ArtifactMetadata,
        sha256: String,
        classifier: Arc<dyn Classifier>,
    ) -> Result<Self> {
        metadata.validate()?;
        if classifier.num_classes() != metadata.labels.len() {
            return Err(ServingError::ModelLoad(format!(
                "Classifier has {} outputs for {} labels",
                classifier.num_classes(),
                metadata.labels.len()
            )));
        }

        Ok(Self {
            reference,
            metadata,
            sha256,
            loaded_at: Utc::now(),
            classifier,
        })
    }

    pub fn version(&self) -> &str {
        &self.reference.version
    }

    /// Ordered class names
    pub fn labels(&self) -> &[String] {
        &self.metadata.labels
    }

    pub fn num_classes(&self) -> usize {
        self.metadata.labels.len()
    }

    /// Input transform the model was trained with
    pub fn transform(&self) -> &TransformSpec {
        &self.metadata.transform
    }

    /// Expected input tensor shape `[3, H, W]`
    pub fn input_shape(&self) -> [usize; 3] {
        self.metadata.transform.input_shape()
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }
}

impl fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModel")
            .field("reference", &self.reference)
            .field("backend", &self.classifier.name())
            .field("labels", &self.metadata.labels)
            .field("sha256", &self.sha256)
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}

/// Deserializes resolved artifacts through the backend registry
pub struct ModelLoader {
    registry: Arc<BackendRegistry>,
}

impl ModelLoader {
    /// Creates a new model loader
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self { registry }
    }

    /// Loads a resolved artifact into memory
    pub async fn load(&self, artifact: &ResolvedArtifact) -> Result<LoadedModel> {
        artifact.metadata.validate()?;
        let factory = self.registry.get(&artifact.metadata.architecture)?;

        info!(
            version = %artifact.reference.version,
            architecture = %artifact.metadata.architecture,
            "Loading model {} into memory",
            artifact.reference
        );

        let path = artifact.artifact_path.clone();
        let metadata = artifact.metadata.clone();
        let classifier = tokio::task::spawn_blocking(move || {
            let bytes = std::fs::read(&path).map_err(|e| {
                ServingError::ModelLoad(format!("Failed to read artifact {}: {}", path.display(), e))
            })?;
            debug!("Deserializing {} bytes from {}", bytes.len(), path.display());
            factory.deserialize(&bytes, &metadata)
        })
        .await
        .map_err(|e| ServingError::Internal(format!("Model load task failed: {}", e)))??;

        let model = LoadedModel::from_parts(
            artifact.reference.clone(),
            artifact.metadata.clone(),
            artifact.sha256.clone(),
            classifier,
        )?;

        info!(
            version = %model.version(),
            num_classes = model.num_classes(),
            "Model {} loaded successfully",
            model.reference
        );

        Ok(model)
    }
}
