//! Admin API for key pool inspection
//!
//! Runs on a separate listener (default 127.0.0.1:9090) so key status and
//! resets are never reachable from the public port.
//!
//! Endpoints:
//! - GET  /admin/keys: per-key status and pool summary
//! - POST /admin/keys/reset: clear flags for one key (`{"index": n}`) or all

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use key_pool::KeyPool;
use serde::Deserialize;
use tokio::time::Instant;

use crate::error::ApiError;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pool: Arc<KeyPool>,
}

impl AdminState {
    pub fn new(pool: Arc<KeyPool>) -> Self {
        Self { pool }
    }
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/keys", get(list_keys))
        .route("/admin/keys/reset", post(reset_keys))
        .with_state(state)
}

/// GET /admin/keys: full pool snapshot. Only masked key previews leave
/// the process.
async fn list_keys(State(state): State<AdminState>) -> impl IntoResponse {
    let status = state.pool.snapshot(Instant::now());
    (StatusCode::OK, axum::Json(status))
}

#[derive(Debug, Default, Deserialize)]
struct ResetRequest {
    index: Option<usize>,
}

/// POST /admin/keys/reset: an empty body resets every key.
async fn reset_keys(State(state): State<AdminState>, body: Bytes) -> Response {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        ResetRequest::default()
    } else {
        match serde_json::from_slice::<ResetRequest>(&body) {
            Ok(r) => r,
            Err(e) => return ApiError::BadRequest(e.to_string()).into_response(),
        }
    };

    if let Err(e) = state.pool.reset(request.index) {
        return ApiError::from(e).into_response();
    }

    (
        StatusCode::OK,
        axum::Json(serde_json::json!({
            "reset": request.index.map_or("all".to_string(), |i| i.to_string()),
            "available_keys": state.pool.snapshot(Instant::now()).summary.available_keys,
        })),
    )
        .into_response()
}
