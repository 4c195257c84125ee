//! Main integration module for image serving
//!
//! This module wires the object store, artifact resolver, lifecycle manager
//! and HTTP surface together from one [`ServingConfig`].

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use api_gateway::{AppState, InferenceRequest, RequestOrchestrator};
use common::PredictionResult;
use model_manager::{ArtifactResolver, BackendRegistry, LifecycleManager, ModelLoader, ServingSnapshot};
use serving_config::ServingConfig;
use storage_adapter::ObjectStore;

pub use serving_config;

/// Fully wired serving application
pub struct ServingApp {
    config: ServingConfig,
    lifecycle: Arc<LifecycleManager>,
    orchestrator: Arc<RequestOrchestrator>,
}

impl ServingApp {
    /// Builds the application, creating the store described by `config.store`
    pub fn new(config: ServingConfig) -> Result<Self> {
        let store = storage_adapter::build(&config.store).context("Failed to create object store")?;
        Ok(Self::with_store(config, store))
    }

    /// Builds the application on top of an existing store
    pub fn with_store(config: ServingConfig, store: Arc<dyn ObjectStore>) -> Self {
        info!(store = %store.describe(), cache = %config.store.cache_dir.display(), "Initializing image serving");

        let resolver = Arc::new(ArtifactResolver::new(
            store,
            config.store.cache_dir.clone(),
            config.timeouts.artifact_fetch(),
        ));
        let loader = ModelLoader::new(Arc::new(BackendRegistry::default()));
        let lifecycle = Arc::new(LifecycleManager::new(config.model_reference(), resolver, loader));
        let orchestrator = Arc::new(RequestOrchestrator::from_config(lifecycle.clone(), &config));

        Self {
            config,
            lifecycle,
            orchestrator,
        }
    }

    pub fn config(&self) -> &ServingConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn orchestrator(&self) -> &Arc<RequestOrchestrator> {
        &self.orchestrator
    }

    /// Handler state for the HTTP router
    pub fn state(&self) -> Arc<AppState> {
        Arc::new(AppState::from_config(self.orchestrator.clone(), &self.config))
    }

    /// Loads the model in the background and serves HTTP until `shutdown`
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self
            .config
            .server
            .socket_addr()
            .with_context(|| format!("Invalid listen address {}", self.config.server.addr()))?;

        // Traffic is accepted during cold start and answered with NOT_READY.
        self.lifecycle.spawn_start();

        let router = api_gateway::create_router(self.state());
        api_gateway::serve(router, addr, shutdown)
            .await
            .context("HTTP server failed")?;

        info!("Image serving stopped");
        Ok(())
    }

    /// Resolves and loads the model, failing if it cannot become ready
    pub async fn check(&self) -> Result<ServingSnapshot> {
        let snapshot = self.lifecycle.start().await;
        if snapshot.is_ready() {
            return Ok(snapshot);
        }
        match &snapshot.last_error {
            Some(e) => bail!("Model {} failed to load: {}", self.lifecycle.reference(), e),
            None => bail!("Model {} is {} after start", self.lifecycle.reference(), snapshot.state),
        }
    }

    /// Loads the model and classifies one local file
    pub async fn predict_file(&self, path: &Path, content_type: Option<&str>) -> Result<PredictionResult> {
        self.check().await?;

        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let content_type = content_type.unwrap_or_else(|| guess_content_type(path));
        if content_type == "application/octet-stream" {
            warn!("Could not infer a media type for {}", path.display());
        }

        let result = self
            .orchestrator
            .predict(InferenceRequest::new(bytes, content_type))
            .await?;
        Ok(result)
    }
}

/// Media type implied by a file extension
pub fn guess_content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}
