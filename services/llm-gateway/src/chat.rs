//! Chat completion handler
//!
//! Parses the inbound request, hands it to the scheduler and maps the
//! terminal outcome to an HTTP response. Retries, key rotation and
//! degradation all happen inside the scheduler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use key_pool::Scheduler;
use provider::RequestSpec;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::error::ApiError;
use crate::metrics;

/// Parse a chat completion body. Rejects payloads without messages, since
/// every upstream attempt would fail on them anyway.
pub fn parse_request(body: &[u8]) -> Result<RequestSpec, ApiError> {
    let spec: RequestSpec =
        serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if spec.model.trim().is_empty() {
        return Err(ApiError::BadRequest("model must not be empty".into()));
    }
    if spec.messages.is_empty() {
        return Err(ApiError::BadRequest("messages must not be empty".into()));
    }
    Ok(spec)
}

/// Run one chat completion through the scheduler.
#[instrument(skip_all, fields(request_id = %request_id))]
pub async fn complete(scheduler: &Scheduler, body: &[u8], request_id: String) -> Response {
    let started = Instant::now();

    let response = match parse_request(body) {
        Ok(spec) => {
            info!(model = %spec.model, messages = spec.messages.len(), "chat completion requested");
            match scheduler.execute(&spec).await {
                Ok(upstream) => (
                    StatusCode::OK,
                    [(axum::http::header::CONTENT_TYPE, "application/json")],
                    upstream.body.to_string(),
                )
                    .into_response(),
                Err(e) => {
                    warn!(error = %e, "chat completion failed");
                    ApiError::from(e).into_response_with_id(&request_id)
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "rejected malformed request");
            e.into_response_with_id(&request_id)
        }
    };

    let status = response.status().as_u16();
    metrics::record_request("chat", status, started.elapsed().as_secs_f64());
    metrics::set_available_keys(
        scheduler
            .pool()
            .snapshot(Instant::now())
            .summary
            .available_keys,
    );
    info!(status, duration_ms = started.elapsed().as_millis() as u64, "request complete");

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_minimal_request() {
        let spec = parse_request(
            br#"{"model":"qwen/qwen-2.5-72b-instruct","messages":[{"role":"user","content":"hi"}]}"#,
        )
        .unwrap();
        assert_eq!(spec.model, "qwen/qwen-2.5-72b-instruct");
        assert_eq!(spec.messages.len(), 1);
        assert_eq!(spec.max_tokens, None);
    }

    #[test]
    fn parse_keeps_explicit_budget() {
        let spec = parse_request(
            br#"{"model":"m","messages":[{"role":"user","content":"hi"}],"temperature":0.2,"max_tokens":300}"#,
        )
        .unwrap();
        assert_eq!(spec.max_tokens, Some(300));
        assert!((spec.temperature - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn parse_rejects_malformed_json() {
        let err = parse_request(b"{not json").unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn parse_rejects_empty_messages() {
        let err = parse_request(br#"{"model":"m","messages":[]}"#).unwrap_err();
        assert!(err.to_string().contains("messages"), "got: {err}");
    }

    #[test]
    fn parse_rejects_blank_model() {
        let err =
            parse_request(br#"{"model":"  ","messages":[{"role":"user","content":"hi"}]}"#)
                .unwrap_err();
        assert!(err.to_string().contains("model"), "got: {err}");
    }
}
