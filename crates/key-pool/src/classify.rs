//! Failure classification for dispatch errors
//!
//! Ordered predicates over the structured `TransportError`: the HTTP status
//! decides first (402 → credits, 429 → rate limit). Only when the status is
//! absent or inconclusive does the message text get scanned, which covers
//! providers that wrap a 402/429 inside a 200/5xx body or a client error.

use provider::{ErrorClass, TransportError};

/// Message fragments signalling exhausted credits.
const CREDIT_PATTERNS: &[&str] = &["402", "payment required", "credit"];

/// Message fragments signalling throttling.
const RATE_LIMIT_PATTERNS: &[&str] = &["429", "rate limit", "too many requests"];

/// Classify by HTTP status alone. `None` means the status says nothing
/// about the credential and the message fallback should decide.
pub fn classify_status(status: u16) -> Option<ErrorClass> {
    match status {
        402 => Some(ErrorClass::InsufficientCredits),
        429 => Some(ErrorClass::RateLimited),
        _ => None,
    }
}

/// Classify free-form error text. Credit patterns win over rate-limit
/// patterns; no match is `Other`. Case-insensitive.
pub fn classify_message(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    if CREDIT_PATTERNS.iter().any(|p| lower.contains(p)) {
        return ErrorClass::InsufficientCredits;
    }
    if RATE_LIMIT_PATTERNS.iter().any(|p| lower.contains(p)) {
        return ErrorClass::RateLimited;
    }
    ErrorClass::Other
}

/// Classify a transport failure: status first, message text as fallback.
pub fn classify(error: &TransportError) -> ErrorClass {
    error
        .status()
        .and_then(classify_status)
        .unwrap_or_else(|| classify_message(error.message()))
}
