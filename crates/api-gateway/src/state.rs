//! Shared handler state

use std::sync::Arc;

use common::ServingError;
use serving_config::ServingConfig;

use crate::error::{ApiError, DEFAULT_RETRY_AFTER_SECS};
use crate::orchestrator::RequestOrchestrator;

/// State shared by all handlers
pub struct AppState {
    pub orchestrator: Arc<RequestOrchestrator>,
    /// Seconds advertised in `Retry-After` on 503 responses
    pub retry_after_secs: u64,
}

impl AppState {
    pub fn new(orchestrator: Arc<RequestOrchestrator>) -> Self {
        Self {
            orchestrator,
            retry_after_secs: DEFAULT_RETRY_AFTER_SECS,
        }
    }

    pub fn from_config(orchestrator: Arc<RequestOrchestrator>, config: &ServingConfig) -> Self {
        Self {
            orchestrator,
            retry_after_secs: config.timeouts.retry_after_secs,
        }
    }

    /// Converts a serving error, attaching the configured retry hint
    pub fn api_error(&self, error: ServingError) -> ApiError {
        ApiError::with_retry_after(error, self.retry_after_secs)
    }
}
