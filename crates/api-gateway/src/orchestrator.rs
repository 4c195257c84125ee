//! Request orchestration
//!
//! Composes the readiness gate, preprocessing and the decision engine for one
//! request. The orchestrator holds no state of its own beyond configuration;
//! everything mutable lives in the lifecycle manager.

use std::sync::Arc;
use std::time::{Duration, Instant};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use common::{ErrorCode, PredictionResult, Result, ServingError, ServingState};
use inference_engine::{DecisionEngine, Preprocessor};
use model_manager::{LifecycleManager, LoadedModel};
use serving_config::ServingConfig;

/// One uploaded image
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub bytes: Bytes,
    /// Declared media type, as received
    pub content_type: String,
    /// Declared size; the byte count is used when nothing else was declared
    pub declared_size: u64,
}

impl InferenceRequest {
    pub fn new(bytes: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        let bytes = bytes.into();
        Self {
            declared_size: bytes.len() as u64,
            bytes,
            content_type: content_type.into(),
        }
    }
}

/// A prediction with the model that produced it
#[derive(Debug, Clone)]
pub struct ServedPrediction {
    pub result: PredictionResult,
    pub model: Arc<LoadedModel>,
}

/// Health probe body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub model_loaded: bool,
}

/// Error summary exposed on the model endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorSummary {
    pub code: ErrorCode,
    pub message: String,
}

/// Description of the serving model
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub state: ServingState,
    pub reference: String,
    pub version: String,
    pub generation: u64,
    pub transitioned_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded: Option<LoadedModelInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadedModelInfo {
    pub architecture: String,
    pub backend: String,
    pub labels: Vec<String>,
    pub input_shape: [usize; 3],
    pub sha256: String,
    pub loaded_at: DateTime<Utc>,
    pub trained_at: Option<DateTime<Utc>>,
    pub val_accuracy: Option<f32>,
}

/// Per-request composition of readiness, preprocessing and inference
pub struct RequestOrchestrator {
    lifecycle: Arc<LifecycleManager>,
    preprocessor: Arc<Preprocessor>,
    engine: DecisionEngine,
    ready_wait: Duration,
    inference_timeout: Duration,
}

impl RequestOrchestrator {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        preprocessor: Preprocessor,
        engine: DecisionEngine,
        ready_wait: Duration,
        inference_timeout: Duration,
    ) -> Self {
        Self {
            lifecycle,
            preprocessor: Arc::new(preprocessor),
            engine,
            ready_wait,
            inference_timeout,
        }
    }

    /// Builds an orchestrator from the policy and timeout sections
    pub fn from_config(lifecycle: Arc<LifecycleManager>, config: &ServingConfig) -> Self {
        Self::new(
            lifecycle,
            Preprocessor::from_policy(&config.policy),
            DecisionEngine::new(config.policy.confidence_threshold),
            config.timeouts.ready_wait(),
            config.timeouts.inference(),
        )
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.preprocessor.max_upload_bytes()
    }

    /// Passes the readiness gate, or fails with `NotReady`/`LoadFailed`
    pub async fn ready_model(&self) -> Result<Arc<LoadedModel>> {
        self.lifecycle.await_ready(self.ready_wait).await
    }

    /// Predicts a label for one upload
    pub async fn predict(&self, request: InferenceRequest) -> Result<PredictionResult> {
        self.predict_detailed(request).await.map(|served| served.result)
    }

    /// Predicts a label and returns the model that was used
    pub async fn predict_detailed(&self, request: InferenceRequest) -> Result<ServedPrediction> {
        let model = self.ready_model().await?;
        let started = Instant::now();

        let preprocessor = Arc::clone(&self.preprocessor);
        let engine = self.engine;
        let task_model = Arc::clone(&model);

        // Decode and forward pass are CPU-bound and run in order on one
        // blocking thread.
        let task = tokio::task::spawn_blocking(move || {
            let decoded = preprocessor.decode(
                &request.bytes,
                &request.content_type,
                request.declared_size,
                task_model.transform(),
            )?;
            engine.predict(&task_model, &decoded)
        });

        let result = match tokio::time::timeout(self.inference_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ServingError::Internal(format!("Inference task failed: {}", e))),
            Err(_) => Err(ServingError::Inference(format!(
                "Inference did not complete within {:?}",
                self.inference_timeout
            ))),
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(prediction) => info!(
                version = %model.version(),
                label = %prediction.label,
                confidence = prediction.confidence,
                latency_ms,
                "Prediction served"
            ),
            Err(e) if e.is_client_error() => debug!(code = %e.code(), latency_ms, "Upload rejected: {}", e),
            Err(e) => error!(version = %model.version(), code = %e.code(), latency_ms, "Prediction failed: {}", e),
        }

        result.map(|result| ServedPrediction { result, model })
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: "online",
            model_loaded: self.lifecycle.current().is_ready(),
        }
    }

    pub fn model_info(&self) -> ModelInfo {
        let snapshot = self.lifecycle.current();
        let reference = self.lifecycle.reference();

        ModelInfo {
            state: snapshot.state,
            reference: reference.to_string(),
            version: reference.version.clone(),
            generation: snapshot.generation,
            transitioned_at: snapshot.transitioned_at,
            loaded: snapshot.model.as_ref().map(|model| LoadedModelInfo {
                architecture: model.metadata.architecture.clone(),
                backend: model.classifier().name().to_string(),
                labels: model.labels().to_vec(),
                input_shape: model.input_shape(),
                sha256: model.sha256.clone(),
                loaded_at: model.loaded_at,
                trained_at: model.metadata.trained_at,
                val_accuracy: model.metadata.val_accuracy,
            }),
            last_error: snapshot.last_error.as_ref().map(|e| ErrorSummary {
                code: e.code(),
                message: e.to_string(),
            }),
        }
    }

    /// Starts a reload in the background and returns the state at hand-off
    pub fn trigger_reload(&self) -> ServingState {
        let state = self.lifecycle.state();
        if state == ServingState::Loading {
            debug!("Reload already in flight");
        } else {
            info!(state = %state, "Reload requested");
            self.lifecycle.spawn_reload();
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_manager::{fixtures, ArtifactResolver, BackendRegistry, ModelLoader};
    use storage_adapter::MemoryStore;
    use common::{Label, ModelReference};
    use image::{ImageOutputFormat, Rgb, RgbImage};

    fn png(color: [u8; 3]) -> Vec<u8> {
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb(color)))
            .write_to(&mut std::io::Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    fn orchestrator(store: Arc<MemoryStore>, cache: &std::path::Path) -> RequestOrchestrator {
        let reference = ModelReference::new("rgb", "v1", "model.json");
        let resolver = Arc::new(ArtifactResolver::new(store, cache, Duration::from_secs(5)));
        let loader = ModelLoader::new(Arc::new(BackendRegistry::default()));
        let lifecycle = Arc::new(LifecycleManager::new(reference, resolver, loader));
        RequestOrchestrator::from_config(lifecycle, &ServingConfig::default())
    }

    #[tokio::test]
    async fn test_predict_requires_ready_model() {
        let store = Arc::new(MemoryStore::new());
        let cache = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(store, cache.path());

        assert!(!orchestrator.health().model_loaded);
        let err = orchestrator
            .predict(InferenceRequest::new(png([255, 0, 0]), "image/png"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServingError::NotReady(_)));
    }

    #[tokio::test]
    async fn test_predict_after_start() {
        let store = Arc::new(MemoryStore::new());
        let reference = ModelReference::new("rgb", "v1", "model.json");
        fixtures::seed_channel_store(&store, &reference, 8.0, 4, 4);
        let cache = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(store, cache.path());
        orchestrator.lifecycle().start().await;

        assert!(orchestrator.health().model_loaded);
        let result = orchestrator
            .predict(InferenceRequest::new(png([0, 255, 0]), "image/png"))
            .await
            .unwrap();
        assert_eq!(result.label, Label::Class("Green".to_string()));

        let info = orchestrator.model_info();
        assert_eq!(info.state, ServingState::Ready);
        assert_eq!(info.loaded.unwrap().labels, vec!["Red", "Green", "Blue"]);
    }

    #[tokio::test]
    async fn test_validation_errors_pass_through() {
        let store = Arc::new(MemoryStore::new());
        let reference = ModelReference::new("rgb", "v1", "model.json");
        fixtures::seed_channel_store(&store, &reference, 8.0, 4, 4);
        let cache = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(store, cache.path());
        orchestrator.lifecycle().start().await;

        let err = orchestrator
            .predict(InferenceRequest::new(&b"plain text"[..], "text/plain"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServingError::UnsupportedMediaType(_)));

        let err = orchestrator
            .predict(InferenceRequest::new(vec![7u8; 10], "image/jpeg"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServingError::CorruptImage(_)));
    }

    #[tokio::test]
    async fn test_model_info_reports_failure() {
        let store = Arc::new(MemoryStore::new());
        let cache = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(store, cache.path());
        orchestrator.lifecycle().start().await;

        let info = orchestrator.model_info();
        assert_eq!(info.state, ServingState::Failed);
        assert!(info.loaded.is_none());
        assert_eq!(info.last_error.unwrap().code, ErrorCode::ArtifactUnavailable);
    }
}
