//! HTTP-facing error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors a handler turns into a JSON error response.
///
/// Per-attempt upstream failures are absorbed by the scheduler; only the
/// terminal outcome of a request reaches this type.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("all retries exhausted: {0}")]
    RetriesExhausted(String),

    #[error("{0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::RetriesExhausted(_) => StatusCode::BAD_GATEWAY,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable `error.type` value.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "invalid_request",
            ApiError::RetriesExhausted(_) => "retries_exhausted",
            ApiError::NotFound(_) => "not_found",
            ApiError::Internal(_) => "internal_error",
        }
    }

    /// Render as `{"error": {"type", "message", "request_id"}}`.
    pub fn into_response_with_id(self, request_id: &str) -> Response {
        let body = serde_json::json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
                "request_id": request_id,
            }
        });
        (
            self.status(),
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

impl From<key_pool::Error> for ApiError {
    fn from(err: key_pool::Error) -> Self {
        match err {
            key_pool::Error::RetriesExhausted { last } => {
                ApiError::RetriesExhausted(last.to_string())
            }
            key_pool::Error::NotFound(index) => {
                ApiError::NotFound(format!("key not found: index {index}"))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.into_response_with_id("")
    }
}
