//! Error responses
//!
//! Every failure is rendered as `{"error": {"code": "...", "message": "..."}}`
//! with a status derived from the error kind. Server-side failures are
//! answered with a generic message; their detail stays in the logs.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use common::ServingError;

/// `Retry-After` value used when the caller did not supply one
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Serving(#[from] ServingError),

    /// The model cannot serve yet; carries the retry hint
    #[error("{error}")]
    Unavailable { error: ServingError, retry_after_secs: u64 },

    /// Malformed multipart body or missing `file` field
    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl ApiError {
    /// Wraps a serving error, attaching `retry_after_secs` to availability errors
    pub fn with_retry_after(error: ServingError, retry_after_secs: u64) -> Self {
        if error.is_retryable() {
            ApiError::Unavailable { error, retry_after_secs }
        } else {
            ApiError::Serving(error)
        }
    }
}

/// HTTP status for a serving error
pub fn status_for(error: &ServingError) -> StatusCode {
    match error {
        ServingError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        ServingError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ServingError::CorruptImage(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ServingError::NotReady(_) | ServingError::LoadFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(status: StatusCode, code: &str, message: String) -> Response {
    (status, Json(json!({ "error": { "code": code, "message": message } }))).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => {
                tracing::debug!(detail = %msg, "Bad request");
                error_body(StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
            }
            ApiError::Unavailable { error, retry_after_secs } => {
                let mut response = error_body(status_for(&error), error.code().as_str(), error.to_string());
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
                response
            }
            ApiError::Serving(error) if error.is_retryable() => {
                ApiError::Unavailable { error, retry_after_secs: DEFAULT_RETRY_AFTER_SECS }.into_response()
            }
            ApiError::Serving(error) if error.is_client_error() => {
                tracing::debug!(code = %error.code(), detail = %error, "Upload rejected");
                error_body(status_for(&error), error.code().as_str(), error.to_string())
            }
            ApiError::Serving(error) => {
                // Logged at error level where the failure happened.
                tracing::debug!(code = %error.code(), "Masking internal error in response");
                let message = match &error {
                    ServingError::Inference(_) => "Inference failed. Check server logs for details.",
                    _ => "An internal error occurred",
                };
                error_body(status_for(&error), error.code().as_str(), message.to_string())
            }
        }
    }
}
