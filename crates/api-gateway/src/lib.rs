//! HTTP surface for image serving
//!
//! This crate composes the readiness gate, preprocessing and the decision
//! engine per request and exposes them over HTTP:
//!
//! - `GET /health` reports liveness and whether a model is loaded
//! - `POST /predict` classifies a multipart image upload
//! - `GET /model` describes the serving model and the last load error
//! - `POST /admin/reload` reloads the artifact in the background

pub mod error;
pub mod orchestrator;
pub mod state;
pub mod handlers;
pub mod routes;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

// Re-export commonly used types
pub use error::{status_for, ApiError};
pub use orchestrator::{HealthStatus, InferenceRequest, ModelInfo, RequestOrchestrator, ServedPrediction};
pub use routes::api_routes;
pub use state::AppState;

/// Room left in the request body limit for multipart framing
pub const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

/// Builds the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state
        .orchestrator
        .max_upload_bytes()
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .merge(api_routes())
        .layer(DefaultBodyLimit::max(usize::try_from(body_limit).unwrap_or(usize::MAX)))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves `router` on `addr` until `shutdown` resolves
pub async fn serve<F>(router: Router, addr: SocketAddr, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", listener.local_addr()?);
    info!("API endpoints:");
    info!("  GET  /health - Health check");
    info!("  POST /predict - Classify an image");
    info!("  GET  /model - Serving model details");
    info!("  POST /admin/reload - Reload the model artifact");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
