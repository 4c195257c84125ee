//! HTTP request handlers

use std::sync::Arc;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use common::{Label, ServingError};

use crate::error::ApiError;
use crate::orchestrator::{HealthStatus, InferenceRequest, ModelInfo};
use crate::state::AppState;

/// Multipart field carrying the image
pub const FILE_FIELD: &str = "file";

/// Media type assumed when the part declares none
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Default, Deserialize)]
pub struct PredictQuery {
    /// Adds the score vector and label order to the response
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub prediction: Label,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_scores: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    Json(state.orchestrator.health())
}

pub async fn model_info(State(state): State<Arc<AppState>>) -> Json<ModelInfo> {
    Json(state.orchestrator.model_info())
}

/// Triggers a background reload
pub async fn reload(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let previous = state.orchestrator.trigger_reload();
    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": "accepted", "state": previous })),
    )
}

/// Classifies the image in the `file` field
pub async fn predict(
    State(state): State<Arc<AppState>>,
    query: Result<Query<PredictQuery>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let multipart = multipart.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    // Fail fast before draining an upload the model cannot serve.
    state
        .orchestrator
        .ready_model()
        .await
        .map_err(|e| state.api_error(e))?;

    let limit = state.orchestrator.max_upload_bytes();
    let (bytes, content_type) = read_upload(multipart, limit).await?;
    debug!(size = bytes.len(), content_type = %content_type, "Upload received");

    let served = state
        .orchestrator
        .predict_detailed(InferenceRequest::new(bytes, content_type))
        .await
        .map_err(|e| state.api_error(e))?;

    let verbose = query.verbose;
    Ok(Json(PredictResponse {
        prediction: served.result.label,
        confidence: served.result.confidence,
        raw_scores: verbose.then_some(served.result.raw_scores),
        labels: verbose.then(|| served.model.labels().to_vec()),
        model_version: verbose.then(|| served.model.version().to_string()),
    }))
}

/// Reads the `file` field chunk by chunk, stopping once `limit` is exceeded
async fn read_upload(mut multipart: Multipart, limit: u64) -> Result<(Bytes, String), ApiError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        if field.name() != Some(FILE_FIELD) {
            debug!(field = ?field.name(), "Skipping multipart field");
            continue;
        }

        let content_type = field
            .content_type()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let mut buffer = BytesMut::new();
        while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, limit))? {
            let received = (buffer.len() + chunk.len()) as u64;
            if received > limit {
                return Err(ServingError::PayloadTooLarge { size: received, limit }.into());
            }
            buffer.extend_from_slice(&chunk);
        }

        return Ok((buffer.freeze(), content_type));
    }

    Err(ApiError::BadRequest(format!("Missing multipart field '{}'", FILE_FIELD)))
}

fn multipart_error(error: MultipartError, limit: u64) -> ApiError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServingError::PayloadTooLarge {
            size: limit + 1,
            limit,
        }
        .into()
    } else {
        ApiError::BadRequest(error.body_text())
    }
}

/// JSON 404 for unknown routes
pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": { "code": "NOT_FOUND", "message": "No such route" } })),
    )
}
