//! Transport abstraction for upstream LLM chat completions
//!
//! Defines the `Transport` trait that decouples the key scheduler from the
//! HTTP details of the multiplexed provider. The scheduler hands a transport
//! one credential and one (possibly degraded) `RequestSpec` per attempt, and
//! classifies whatever `TransportError` comes back to decide how that
//! credential is penalized.

pub mod openrouter;

pub use openrouter::OpenRouterTransport;

use common::Secret;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Classification of a failed dispatch, driving the credential's cooldown.
///
/// - InsufficientCredits: long cooldown, credits do not come back on their own
/// - RateLimited: short cooldown, throttling is transient
/// - Other: soft penalty so a flaky credential is not hammered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Payment required / credits exhausted (402)
    InsufficientCredits,
    /// Too many requests (429)
    RateLimited,
    /// Anything else: timeouts, 5xx, malformed responses
    Other,
}

impl ErrorClass {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorClass::InsufficientCredits => "insufficient_credits",
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::Other => "other",
        }
    }
}

/// One chat message in OpenAI-compatible shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Logical parameters of one chat completion call.
///
/// Treated as immutable input: the scheduler derives a fresh request for every
/// attempt instead of editing the caller's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSpec {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

impl RequestSpec {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: default_temperature(),
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Successful upstream response. The body is opaque to the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

/// Failure reported by a transport, structured enough to classify.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Upstream answered with a non-success status.
    #[error("upstream returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The call never produced a status (connect failure, timeout, bad body).
    #[error("transport failure: {0}")]
    Connection(String),
}

impl TransportError {
    /// HTTP status, if the upstream produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            TransportError::Connection(_) => None,
        }
    }

    /// Message text without the status prefix.
    pub fn message(&self) -> &str {
        match self {
            TransportError::Status { message, .. } => message,
            TransportError::Connection(message) => message,
        }
    }
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Abstraction over the outbound call to the LLM provider.
///
/// Implementations must be safe to call concurrently: the scheduler never
/// holds its pool lock across `dispatch`, so several calls may be in flight.
/// Transport-level timeouts are the implementation's responsibility.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Transport>`).
pub trait Transport: Send + Sync {
    /// Identifier for logging (e.g. "openrouter")
    fn id(&self) -> &str;

    /// Send one chat completion with the given credential.
    fn dispatch<'a>(
        &'a self,
        credential: &'a Secret<String>,
        spec: &'a RequestSpec,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse>> + Send + 'a>>;
}
