//! Multi-key request scheduler for OpenRouter-style LLM endpoints
//!
//! Spreads chat completions over a fixed set of API keys with round-robin
//! selection, per-key availability tracking with cooldowns, and progressive
//! request degradation across a bounded retry loop. The pool is built once at
//! startup and shared by `Arc` between every caller.
//!
//! Request lifecycle:
//! 1. Caller hands a `RequestSpec` to `Scheduler::execute`
//! 2. `KeyPool::select_key` picks the next usable key (round-robin)
//! 3. `degrade` derives the request for this attempt (token cap, cheaper model)
//! 4. The transport dispatches outside the pool lock
//! 5. Success → usage recorded, rotation advances, response returned
//! 6. Failure → classified, key cooled down, backoff, next attempt
//! 7. Third failure → `Error::RetriesExhausted` with the last transport error
//!
//! Key lifecycle:
//! - 402 / credit exhaustion → `credits_exhausted`, 30 minute cooldown
//! - 429 / rate limit → `rate_limited`, 60 second cooldown
//! - anything else → 30 second cooldown, no flag
//! - cooldown lapses → key usable again; operator `reset` clears early

pub mod classify;
pub mod degrade;
pub mod error;
pub mod pool;
pub mod scheduler;
pub mod status;

pub use classify::{classify, classify_message, classify_status};
pub use degrade::{MODEL_FALLBACK_CHAIN, degrade};
pub use error::{Error, Result};
pub use pool::{CredentialState, KeyPool, SelectedKey};
pub use scheduler::Scheduler;
pub use status::{HealthStatus, KeyStatus, PoolStatus, PoolSummary};
