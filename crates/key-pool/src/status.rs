//! Read-only pool status for health and admin endpoints
//!
//! The snapshot reports keys as a selection at `now` would see them, but it
//! never writes: lapsed cooldowns are evaluated on a copy and stay in the pool
//! until the next real check clears them.

use serde::Serialize;
use tokio::time::Instant;

use crate::pool::KeyPool;

/// Overall pool health: healthy while at least one key is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

impl HealthStatus {
    pub fn label(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
        }
    }
}

/// One key's status. Never carries the full key.
#[derive(Debug, Clone, Serialize)]
pub struct KeyStatus {
    pub index: usize,
    pub key_preview: String,
    pub requests: u64,
    pub errors: u64,
    pub last_used_secs_ago: Option<u64>,
    pub credits_exhausted: bool,
    pub rate_limited: bool,
    pub in_cooldown: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining_secs: Option<u64>,
    pub available: bool,
}

/// Pool-wide totals.
#[derive(Debug, Clone, Serialize)]
pub struct PoolSummary {
    pub total_requests: u64,
    pub total_errors: u64,
    /// `total_errors / total_requests`, 0 before the first success.
    pub error_rate: f64,
    pub available_keys: usize,
    pub health_status: HealthStatus,
}

/// Full pool snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub total_keys: usize,
    pub current_key_index: usize,
    pub keys: Vec<KeyStatus>,
    pub summary: PoolSummary,
}

impl KeyPool {
    /// Aggregate per-key and pool-wide status at `now` without mutating it.
    pub fn snapshot(&self, now: Instant) -> PoolStatus {
        let state = self.lock();

        let keys: Vec<KeyStatus> = state
            .entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let view = entry.settled(now);
                KeyStatus {
                    index,
                    key_preview: self.preview(index),
                    requests: view.request_count,
                    errors: view.error_count,
                    last_used_secs_ago: view
                        .last_used_at
                        .map(|t| now.saturating_duration_since(t).as_secs()),
                    credits_exhausted: view.credits_exhausted,
                    rate_limited: view.rate_limited,
                    in_cooldown: view.in_cooldown(now),
                    cooldown_remaining_secs: view
                        .blocked_until()
                        .map(|until| until.saturating_duration_since(now).as_secs()),
                    available: view.available(now),
                }
            })
            .collect();

        let total_requests: u64 = keys.iter().map(|k| k.requests).sum();
        let total_errors: u64 = keys.iter().map(|k| k.errors).sum();
        let available_keys = keys.iter().filter(|k| k.available).count();
        let error_rate = if total_requests > 0 {
            total_errors as f64 / total_requests as f64
        } else {
            0.0
        };
        let health_status = if available_keys > 0 {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        PoolStatus {
            total_keys: keys.len(),
            current_key_index: state.next_index,
            keys,
            summary: PoolSummary {
                total_requests,
                total_errors,
                error_rate,
                available_keys,
                health_status,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Secret;
    use provider::ErrorClass;
    use std::time::Duration;

    fn pool(n: usize) -> KeyPool {
        let keys = (0..n)
            .map(|i| Secret::new(format!("sk-or-v1-status-key-{i:04}")))
            .collect();
        KeyPool::new(keys).unwrap()
    }

    #[test]
    fn fresh_pool_is_healthy() {
        let pool = pool(2);
        let status = pool.snapshot(Instant::now());

        assert_eq!(status.total_keys, 2);
        assert_eq!(status.current_key_index, 0);
        assert_eq!(status.summary.available_keys, 2);
        assert_eq!(status.summary.health_status, HealthStatus::Healthy);
        assert_eq!(status.summary.error_rate, 0.0);
        assert!(status.keys.iter().all(|k| k.available && !k.in_cooldown));
    }

    #[test]
    fn all_keys_cooling_is_degraded() {
        let pool = pool(2);
        let t = Instant::now();
        pool.record_failure(0, ErrorClass::InsufficientCredits, t);
        pool.record_failure(1, ErrorClass::RateLimited, t);

        let status = pool.snapshot(t + Duration::from_secs(10));

        assert_eq!(status.summary.available_keys, 0);
        assert_eq!(status.summary.health_status, HealthStatus::Degraded);
        assert_eq!(status.summary.total_errors, 2);

        let k0 = &status.keys[0];
        assert!(k0.credits_exhausted);
        assert!(k0.in_cooldown);
        assert_eq!(k0.cooldown_remaining_secs, Some(1790));

        let k1 = &status.keys[1];
        assert!(k1.rate_limited);
        assert_eq!(k1.cooldown_remaining_secs, Some(50));
    }

    #[test]
    fn snapshot_does_not_clear_lapsed_cooldowns() {
        let pool = pool(1);
        let t = Instant::now();
        pool.record_failure(0, ErrorClass::RateLimited, t);

        let later = t + Duration::from_secs(120);
        let status = pool.snapshot(later);
        assert!(status.keys[0].available, "lapsed cooldown reads as available");
        assert!(!status.keys[0].rate_limited);
        assert_eq!(status.summary.health_status, HealthStatus::Healthy);

        let stored = pool.state(0).unwrap();
        assert!(stored.rate_limited, "snapshot must not mutate the pool");
        assert_eq!(stored.cooldown_until, Some(t + Duration::from_secs(60)));
    }

    #[test]
    fn remaining_time_follows_the_credit_window() {
        let pool = pool(1);
        let t = Instant::now();
        pool.record_failure(0, ErrorClass::InsufficientCredits, t);
        pool.record_failure(0, ErrorClass::Other, t + Duration::from_secs(2));

        let status = pool.snapshot(t + Duration::from_secs(100));
        let k0 = &status.keys[0];
        assert!(k0.credits_exhausted);
        assert!(k0.in_cooldown);
        assert!(!k0.available);
        assert_eq!(k0.cooldown_remaining_secs, Some(1700));
        assert_eq!(status.summary.health_status, HealthStatus::Degraded);
    }

    #[test]
    fn error_rate_and_usage_totals() {
        let pool = pool(2);
        let t = Instant::now();
        pool.record_success(0, t);
        pool.record_success(1, t);
        pool.record_success(1, t);
        pool.record_success(0, t);
        pool.record_failure(1, ErrorClass::Other, t);

        let status = pool.snapshot(t + Duration::from_secs(7));
        assert_eq!(status.summary.total_requests, 4);
        assert_eq!(status.summary.total_errors, 1);
        assert_eq!(status.summary.error_rate, 0.25);
        assert_eq!(status.keys[0].last_used_secs_ago, Some(7));
        assert_eq!(status.summary.available_keys, 1);
    }

    #[test]
    fn serialized_status_never_contains_full_key() {
        let pool = pool(1);
        let status = pool.snapshot(Instant::now());
        let json = serde_json::to_value(&status).unwrap();

        assert_eq!(json["keys"][0]["key_preview"], "sk-or-v1-s...0000");
        assert_eq!(json["summary"]["health_status"], "healthy");
        assert!(json["keys"][0].get("cooldown_remaining_secs").is_none());
        assert!(!json.to_string().contains("sk-or-v1-status-key-0000"));
    }
}
