//! Progressive request degradation across retry attempts
//!
//! Each retry gets a cheaper variant of the caller's request: a smaller
//! output-token budget and, where the model is known, the next cheaper entry
//! of the fallback chain. The caller's request is never edited; every attempt
//! derives its own copy from the original.

use provider::RequestSpec;

/// Models ranked from most capable / most expensive to cheapest.
pub const MODEL_FALLBACK_CHAIN: &[&str] = &[
    "qwen/qwen-2.5-72b-instruct",
    "qwen/qwen-2.5-32b-instruct",
    "meta-llama/llama-3.1-8b-instruct:free",
    "mistralai/mixtral-8x7b-instruct",
];

/// Output-token ceiling for an attempt. Attempt 0 keeps the caller's budget.
fn token_cap(attempt: u32) -> Option<u32> {
    match attempt {
        0 => None,
        1 => Some(2048),
        2 => Some(1024),
        _ => Some(512),
    }
}

/// Model for an attempt.
///
/// A chain member at index `i` runs one rung cheaper (`chain[i + 1]`) when
/// that rung exists; the last rung stays put. The rung is measured from the
/// requested model, so every attempt lands on the same substitute and later
/// attempts never climb back up. A model outside the chain is redirected to
/// the chain head from attempt 1 on.
fn model_for_attempt<'a>(model: &'a str, attempt: u32, chain: &'a [&'a str]) -> &'a str {
    match chain.iter().position(|m| *m == model) {
        Some(i) => chain.get(i + 1).copied().unwrap_or(model),
        None if attempt >= 1 => chain.first().copied().unwrap_or(model),
        None => model,
    }
}

/// Derive the request to send on `attempt` (0-based) from the caller's spec.
///
/// Never raises the token budget: the cap is `min(original, cap)` and an
/// absent budget stays absent.
pub fn degrade(spec: &RequestSpec, attempt: u32, chain: &[&str]) -> RequestSpec {
    let mut degraded = spec.clone();

    if let (Some(original), Some(cap)) = (spec.max_tokens, token_cap(attempt)) {
        degraded.max_tokens = Some(original.min(cap));
    }

    let model = model_for_attempt(&spec.model, attempt, chain);
    if model != spec.model {
        degraded.model = model.to_string();
    }

    degraded
}
