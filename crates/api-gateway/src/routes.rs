//! Route definitions

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{health, model_info, not_found, predict, reload};
use crate::state::AppState;

/// Creates the serving routes
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/predict", post(predict))
        .route("/model", get(model_info))
        .route("/admin/reload", post(reload))
        .fallback(not_found)
}
