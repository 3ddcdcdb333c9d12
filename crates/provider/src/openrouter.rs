//! OpenRouter transport: OpenAI-compatible chat completions over HTTPS.
//!
//! One `dispatch` is one POST to `{base_url}/chat/completions` with the
//! credential as a Bearer token. Non-2xx responses become
//! `TransportError::Status` carrying the upstream body so the scheduler can
//! classify credit exhaustion and rate limiting.

use crate::{RequestSpec, Result, Transport, TransportError, TransportResponse};
use common::Secret;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, instrument};

/// Default OpenRouter API base.
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// HTTP transport for OpenRouter (or any OpenAI-compatible endpoint).
pub struct OpenRouterTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl OpenRouterTransport {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    #[instrument(skip_all, fields(model = %spec.model, max_tokens = ?spec.max_tokens))]
    async fn send(
        &self,
        credential: &Secret<String>,
        spec: &RequestSpec,
    ) -> Result<TransportResponse> {
        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(credential.expose())
            .timeout(self.timeout)
            .json(spec)
            .send()
            .await
            .map_err(|e| TransportError::Connection(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            debug!(status = status.as_u16(), "upstream returned error status");
            return Err(TransportError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| TransportError::Connection(format!("invalid response body: {e}")))?;

        Ok(TransportResponse {
            status: status.as_u16(),
            body,
        })
    }
}

impl Transport for OpenRouterTransport {
    fn id(&self) -> &str {
        "openrouter"
    }

    fn dispatch<'a>(
        &'a self,
        credential: &'a Secret<String>,
        spec: &'a RequestSpec,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse>> + Send + 'a>> {
        Box::pin(self.send(credential, spec))
    }
}
