//! Retry orchestrator: one logical request, up to three dispatch attempts
//!
//! Per attempt `n` (0-based): select a key, derive the degraded request for `n`,
//! dispatch outside the pool lock, then either record usage and return, or
//! classify the failure, cool the key down and back off before `n + 1`.
//!
//! States:
//! - Attempting(n) → Succeeded (dispatch ok)
//! - Attempting(n) → Attempting(n + 1) (dispatch failed, n + 1 < MAX_RETRIES)
//! - Attempting(n) → Exhausted (dispatch failed, no attempt left)
//!
//! Backoff is `BASE_DELAY * 2^n` plus up to one second of jitter so callers
//! that failed together do not retry together. It only suspends the calling
//! task.

use std::sync::Arc;
use std::time::Duration;

use provider::{RequestSpec, Transport, TransportError, TransportResponse};
use rand::RngExt;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::classify::classify;
use crate::degrade::{MODEL_FALLBACK_CHAIN, degrade};
use crate::error::{Error, Result};
use crate::pool::KeyPool;

/// Total dispatch attempts per logical request.
pub const MAX_RETRIES: u32 = 3;

/// Base of the exponential backoff between attempts.
pub const BASE_DELAY: Duration = Duration::from_secs(2);

/// Delay after failed attempt `attempt` (0-based): `2s * 2^attempt + U(0, 1)s`.
pub fn backoff_delay(attempt: u32) -> Duration {
    let jitter: f64 = rand::rng().random_range(0.0..1.0);
    BASE_DELAY * 2u32.saturating_pow(attempt) + Duration::from_secs_f64(jitter)
}

/// Schedules chat completions over a shared key pool.
///
/// Cheap to clone; clones share the pool and the transport.
#[derive(Clone)]
pub struct Scheduler {
    pool: Arc<KeyPool>,
    transport: Arc<dyn Transport>,
    chain: &'static [&'static str],
}

impl Scheduler {
    pub fn new(pool: Arc<KeyPool>, transport: Arc<dyn Transport>) -> Self {
        Self {
            pool,
            transport,
            chain: MODEL_FALLBACK_CHAIN,
        }
    }

    /// The shared pool, for status snapshots and operator resets.
    pub fn pool(&self) -> &Arc<KeyPool> {
        &self.pool
    }

    /// Run one logical request to completion.
    ///
    /// Returns the first successful response, or `RetriesExhausted` carrying
    /// the last attempt's transport error once every attempt has failed.
    pub async fn execute(&self, spec: &RequestSpec) -> Result<TransportResponse> {
        self.run(spec, None).await
    }

    /// Like `execute`, but stops scheduling attempts once `abandon` reads
    /// `true`. A dispatch already in flight is allowed to finish; the backoff
    /// sleep is cut short. Returns `Abandoned` when the caller gave up.
    pub async fn execute_until(
        &self,
        spec: &RequestSpec,
        abandon: watch::Receiver<bool>,
    ) -> Result<TransportResponse> {
        self.run(spec, Some(abandon)).await
    }

    /// Blocking form of `execute` for callers without an async runtime.
    ///
    /// Drives the same retry loop on a private current-thread runtime, so the
    /// two forms cannot drift apart. Refuses to run from inside a runtime,
    /// where blocking the worker thread would stall other tasks.
    pub fn execute_blocking(&self, spec: &RequestSpec) -> Result<TransportResponse> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(Error::Runtime(
                "execute_blocking called from inside an async runtime, use execute".into(),
            ));
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Runtime(format!("failed to build runtime: {e}")))?;
        runtime.block_on(self.execute(spec))
    }

    #[instrument(skip_all, fields(transport = self.transport.id(), model = %spec.model))]
    async fn run(
        &self,
        spec: &RequestSpec,
        mut abandon: Option<watch::Receiver<bool>>,
    ) -> Result<TransportResponse> {
        let mut last_error: Option<TransportError> = None;

        for attempt in 0..MAX_RETRIES {
            if abandon.as_ref().is_some_and(|rx| *rx.borrow()) {
                info!(attempt, "request abandoned, no further attempts");
                return Err(Error::Abandoned);
            }

            let selected = self.pool.select_key(Instant::now());
            let request = degrade(spec, attempt, self.chain);
            debug!(
                key_index = selected.index,
                attempt = attempt + 1,
                model = %request.model,
                max_tokens = ?request.max_tokens,
                "dispatching"
            );

            match self.transport.dispatch(&selected.credential, &request).await {
                Ok(response) => {
                    self.pool.record_success(selected.index, Instant::now());
                    metrics::counter!("scheduler_dispatch_total", "outcome" => "success")
                        .increment(1);
                    if attempt > 0 {
                        info!(
                            key_index = selected.index,
                            attempt = attempt + 1,
                            model = %request.model,
                            "request succeeded after retry"
                        );
                    }
                    return Ok(response);
                }
                Err(e) => {
                    let class = classify(&e);
                    self.pool
                        .record_failure(selected.index, class, Instant::now());
                    metrics::counter!("scheduler_dispatch_total", "outcome" => "failure")
                        .increment(1);
                    metrics::counter!("scheduler_key_failures_total", "class" => class.label())
                        .increment(1);
                    warn!(
                        key_index = selected.index,
                        attempt = attempt + 1,
                        class = class.label(),
                        error = %e,
                        "dispatch failed"
                    );
                    last_error = Some(e);

                    if attempt + 1 < MAX_RETRIES {
                        let delay = backoff_delay(attempt);
                        info!(
                            delay_secs = delay.as_secs_f64(),
                            "waiting before next attempt"
                        );
                        if backoff(delay, abandon.as_mut()).await {
                            info!(attempt, "request abandoned during backoff");
                            return Err(Error::Abandoned);
                        }
                    }
                }
            }
        }

        let last = last_error
            .unwrap_or_else(|| TransportError::Connection("no dispatch attempted".into()));
        metrics::counter!("scheduler_retries_exhausted_total").increment(1);
        error!(attempts = MAX_RETRIES, error = %last, "all attempts failed");
        Err(Error::RetriesExhausted { last })
    }
}

/// Sleep for `delay`, waking early if the caller abandons the request.
/// Returns true when abandoned. A dropped sender never counts as abandonment.
async fn backoff(delay: Duration, abandon: Option<&mut watch::Receiver<bool>>) -> bool {
    match abandon {
        None => {
            tokio::time::sleep(delay).await;
            false
        }
        Some(rx) => {
            tokio::select! {
                _ = tokio::time::sleep(delay) => false,
                Ok(_) = rx.wait_for(|abandoned| *abandoned) => true,
            }
        }
    }
}
