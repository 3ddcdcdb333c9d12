//! Key pool: availability tracking and round-robin key selection
//!
//! The pool holds per-key counters, flags and an optional cooldown, plus the
//! rotation pointer. All of it sits behind one mutex scoped to the pool; the
//! lock is only taken for inspection and bookkeeping, never across a
//! transport call, so dispatches proceed in parallel.
//!
//! Cooldown transitions happen lazily: when a key is checked, every window
//! that has lapsed is cleared. The shared cooldown is overwritten by each new
//! failure, but the credit and rate-limit flags carry their own windows, so a
//! later, shorter failure never releases a key out of credits early.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use common::Secret;
use provider::ErrorClass;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Cooldown after the provider reports exhausted credits.
pub const CREDITS_COOLDOWN: Duration = Duration::from_secs(30 * 60);

/// Cooldown after the provider reports throttling.
pub const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(60);

/// Cooldown after any other failure.
pub const ERROR_COOLDOWN: Duration = Duration::from_secs(30);

/// Per-key bookkeeping.
///
/// Counters are monotonic. A key has at most one cooldown; a new failure
/// overwrites it rather than stacking. Each flag expires on its own window
/// (`credits_until`, `rate_limited_until`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialState {
    pub request_count: u64,
    pub error_count: u64,
    pub last_used_at: Option<Instant>,
    pub credits_exhausted: bool,
    pub credits_until: Option<Instant>,
    pub rate_limited: bool,
    pub rate_limited_until: Option<Instant>,
    pub cooldown_until: Option<Instant>,
}

impl CredentialState {
    /// Drop every lapsed window and the flag it guards. Returns whether
    /// anything was cleared.
    fn settle(&mut self, now: Instant) -> bool {
        let lapsed = |until: Option<Instant>| until.is_some_and(|u| now >= u);
        let mut cleared = false;

        if lapsed(self.cooldown_until) {
            self.cooldown_until = None;
            cleared = true;
        }
        if lapsed(self.credits_until) {
            self.credits_until = None;
            self.credits_exhausted = false;
            cleared = true;
        }
        if lapsed(self.rate_limited_until) {
            self.rate_limited_until = None;
            self.rate_limited = false;
            cleared = true;
        }
        cleared
    }

    /// Latest instant at which any window still blocks the key.
    pub fn blocked_until(&self) -> Option<Instant> {
        [self.cooldown_until, self.credits_until, self.rate_limited_until]
            .into_iter()
            .flatten()
            .max()
    }

    /// Copy of this state as it will look once lapsed cooldowns settle.
    /// Read-only callers use this instead of `settle`.
    pub(crate) fn settled(&self, now: Instant) -> Self {
        let mut view = self.clone();
        view.settle(now);
        view
    }

    /// Whether any window is still live at `now`.
    pub fn in_cooldown(&self, now: Instant) -> bool {
        self.blocked_until().is_some_and(|until| now < until)
    }

    /// Usable iff no flag is set and no live cooldown exists.
    pub(crate) fn available(&self, now: Instant) -> bool {
        !self.credits_exhausted && !self.rate_limited && !self.in_cooldown(now)
    }
}

/// Mutable pool state guarded by the pool mutex.
pub(crate) struct PoolState {
    pub(crate) entries: Vec<CredentialState>,
    pub(crate) next_index: usize,
}

/// A selected key, ready for one dispatch.
#[derive(Debug, Clone)]
pub struct SelectedKey {
    pub index: usize,
    pub credential: Secret<String>,
}

/// Fixed set of API keys with availability tracking.
///
/// Built once at startup and shared via `Arc`. Keys are identified by their
/// position in the configured order.
pub struct KeyPool {
    keys: Vec<Secret<String>>,
    state: Mutex<PoolState>,
}

impl KeyPool {
    /// Create a pool over `keys`, in configured order.
    ///
    /// Returns `PoolExhausted` for an empty key list: a scheduler without
    /// credentials can never dispatch.
    pub fn new(keys: Vec<Secret<String>>) -> Result<Self> {
        if keys.is_empty() {
            return Err(Error::PoolExhausted("no API keys configured".into()));
        }
        let entries = vec![CredentialState::default(); keys.len()];
        info!(keys = keys.len(), "key pool initialized");
        Ok(Self {
            keys,
            state: Mutex::new(PoolState {
                entries,
                next_index: 0,
            }),
        })
    }

    /// Number of keys in the pool (always at least one).
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Always false; a pool cannot be built empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Masked preview of a key for logs and status output.
    pub fn preview(&self, index: usize) -> String {
        self.keys
            .get(index)
            .map(Secret::preview)
            .unwrap_or_else(|| "<unknown>".to_string())
    }

    /// Lock the pool state. A panic while holding the lock cannot leave the
    /// counters half-written, so a poisoned lock is recovered.
    pub(crate) fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the key at `index` may be selected at `now`.
    ///
    /// A lapsed cooldown is cleared as a side effect. Unknown indices are
    /// never usable.
    pub fn is_usable(&self, index: usize, now: Instant) -> bool {
        let mut state = self.lock();
        match state.entries.get_mut(index) {
            Some(entry) => Self::check(entry, index, now),
            None => false,
        }
    }

    fn check(entry: &mut CredentialState, index: usize, now: Instant) -> bool {
        if entry.settle(now) {
            info!(key_index = index, "cooldown expired, key available again");
        }
        entry.available(now)
    }

    /// Pick the key for the next dispatch.
    ///
    /// Scans at most one full rotation from the pointer, stepping the pointer
    /// past every unusable key, and returns the first usable one; the pointer
    /// is left on it. If every key is unusable, returns the key with the
    /// fewest errors (lowest index on ties) regardless of flags or cooldowns:
    /// a degraded key beats no key at all.
    pub fn select_key(&self, now: Instant) -> SelectedKey {
        let mut state = self.lock();
        let n = self.keys.len();

        for _ in 0..n {
            let idx = state.next_index % n;
            if Self::check(&mut state.entries[idx], idx, now) {
                return self.selected(idx);
            }
            debug!(key_index = idx, "key unavailable, rotating");
            state.next_index = (idx + 1) % n;
        }

        let idx = state
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(i, entry)| (entry.error_count, *i))
            .map(|(i, _)| i)
            .unwrap_or(0);
        warn!(
            key_index = idx,
            key = %self.preview(idx),
            errors = state.entries[idx].error_count,
            "all keys unavailable, using the key with the fewest errors"
        );
        self.selected(idx)
    }

    fn selected(&self, index: usize) -> SelectedKey {
        SelectedKey {
            index,
            credential: self.keys[index].clone(),
        }
    }

    /// Record a successful dispatch and advance the rotation pointer so the
    /// next request starts on a different key.
    pub fn record_success(&self, index: usize, now: Instant) {
        let mut state = self.lock();
        let n = self.keys.len();
        if let Some(entry) = state.entries.get_mut(index) {
            entry.request_count += 1;
            entry.last_used_at = Some(now);
        }
        state.next_index = (state.next_index + 1) % n;
    }

    /// Record a failed dispatch and put the key into cooldown.
    ///
    /// - InsufficientCredits → `credits_exhausted`, 30 minutes
    /// - RateLimited → `rate_limited`, 60 seconds
    /// - Other → no flag, 30 seconds
    ///
    /// The shared cooldown is overwritten; a flag window is only ever
    /// extended, never shortened.
    pub fn record_failure(&self, index: usize, class: ErrorClass, now: Instant) {
        let mut state = self.lock();
        let Some(entry) = state.entries.get_mut(index) else {
            return;
        };
        entry.error_count += 1;

        let cooldown = match class {
            ErrorClass::InsufficientCredits => {
                entry.credits_exhausted = true;
                entry.credits_until = entry.credits_until.max(Some(now + CREDITS_COOLDOWN));
                CREDITS_COOLDOWN
            }
            ErrorClass::RateLimited => {
                entry.rate_limited = true;
                entry.rate_limited_until =
                    entry.rate_limited_until.max(Some(now + RATE_LIMIT_COOLDOWN));
                RATE_LIMIT_COOLDOWN
            }
            ErrorClass::Other => ERROR_COOLDOWN,
        };
        entry.cooldown_until = Some(now + cooldown);

        warn!(
            key_index = index,
            key = %self.preview(index),
            class = class.label(),
            cooldown_secs = cooldown.as_secs(),
            errors = entry.error_count,
            "key entering cooldown"
        );
    }

    /// Clear flags and cooldown for one key, or for every key when `index`
    /// is `None`. Counters are kept.
    pub fn reset(&self, index: Option<usize>) -> Result<()> {
        let mut state = self.lock();
        match index {
            Some(i) => {
                let entry = state.entries.get_mut(i).ok_or(Error::NotFound(i))?;
                Self::clear(entry);
                info!(key_index = i, key = %self.preview(i), "key status reset");
            }
            None => {
                state.entries.iter_mut().for_each(Self::clear);
                info!(keys = self.keys.len(), "all key statuses reset");
            }
        }
        Ok(())
    }

    fn clear(entry: &mut CredentialState) {
        entry.credits_exhausted = false;
        entry.credits_until = None;
        entry.rate_limited = false;
        entry.rate_limited_until = None;
        entry.cooldown_until = None;
    }

    /// Copy of one key's state, exactly as stored (no lazy expiry applied).
    pub fn state(&self, index: usize) -> Option<CredentialState> {
        self.lock().entries.get(index).cloned()
    }

    /// Current rotation pointer.
    pub fn current_index(&self) -> usize {
        self.lock().next_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: usize) -> KeyPool {
        let keys = (0..n)
            .map(|i| Secret::new(format!("sk-or-v1-test-key-{i:04}")))
            .collect();
        KeyPool::new(keys).unwrap()
    }

    #[test]
    fn empty_pool_is_rejected() {
        let err = KeyPool::new(vec![]).err().expect("empty pool must fail");
        assert!(matches!(err, Error::PoolExhausted(_)));
    }

    #[test]
    fn selection_stays_on_usable_key_until_success() {
        let pool = pool(3);
        let now = Instant::now();

        assert_eq!(pool.select_key(now).index, 0);
        assert_eq!(pool.select_key(now).index, 0);

        pool.record_success(0, now);
        assert_eq!(pool.select_key(now).index, 1);
        pool.record_success(1, now);
        assert_eq!(pool.select_key(now).index, 2);
        pool.record_success(2, now);
        assert_eq!(pool.select_key(now).index, 0);
    }

    #[test]
    fn select_key_always_returns_pool_member() {
        let now = Instant::now();
        let classes = [
            ErrorClass::InsufficientCredits,
            ErrorClass::RateLimited,
            ErrorClass::Other,
        ];
        for n in 1..=6 {
            let pool = pool(n);
            for round in 0..(3 * n) {
                let selected = pool.select_key(now);
                assert!(selected.index < n);
                assert_eq!(
                    selected.credential.expose(),
                    &format!("sk-or-v1-test-key-{:04}", selected.index)
                );
                if round % 2 == 0 {
                    pool.record_failure(selected.index, classes[round % 3], now);
                } else {
                    pool.record_success(selected.index, now);
                }
            }
        }
    }

    #[test]
    fn skips_cooling_down_keys() {
        let pool = pool(3);
        let now = Instant::now();

        pool.record_failure(0, ErrorClass::Other, now);

        let selected = pool.select_key(now);
        assert_eq!(selected.index, 1);
        assert_eq!(pool.current_index(), 1);
    }

    #[test]
    fn cooldown_blocks_selection_until_expiry() {
        let pool = pool(2);
        let t = Instant::now();
        pool.record_failure(0, ErrorClass::Other, t);

        for offset in [0, 1, 15, 29] {
            let now = t + Duration::from_secs(offset);
            assert_eq!(pool.select_key(now).index, 1, "at +{offset}s");
            pool.record_success(1, now);
        }

        // Pointer is back on key 0; at expiry it is selectable again
        let at_expiry = t + ERROR_COOLDOWN;
        assert_eq!(pool.current_index(), 0);
        assert_eq!(pool.select_key(at_expiry).index, 0);
    }

    #[test]
    fn credits_cooldown_lasts_thirty_minutes() {
        let pool = pool(1);
        let t = Instant::now();
        pool.record_failure(0, ErrorClass::InsufficientCredits, t);

        let state = pool.state(0).unwrap();
        assert!(state.credits_exhausted);
        assert_eq!(state.cooldown_until, Some(t + Duration::from_secs(1800)));

        assert!(!pool.is_usable(0, t));
        assert!(!pool.is_usable(0, t + Duration::from_secs(1799)));
        assert!(pool.is_usable(0, t + Duration::from_secs(1800) + Duration::from_millis(1)));
    }

    #[test]
    fn rate_limit_cooldown_lasts_sixty_seconds() {
        let pool = pool(1);
        let t = Instant::now();
        pool.record_failure(0, ErrorClass::RateLimited, t);

        let state = pool.state(0).unwrap();
        assert!(state.rate_limited);
        assert!(!state.credits_exhausted);
        assert_eq!(state.cooldown_until, Some(t + Duration::from_secs(60)));

        assert!(!pool.is_usable(0, t + Duration::from_secs(59)));
        assert!(pool.is_usable(0, t + Duration::from_secs(60)));
    }

    #[test]
    fn other_failure_cooldown_lasts_thirty_seconds_without_flags() {
        let pool = pool(1);
        let t = Instant::now();
        pool.record_failure(0, ErrorClass::Other, t);

        let state = pool.state(0).unwrap();
        assert!(!state.rate_limited);
        assert!(!state.credits_exhausted);
        assert_eq!(state.cooldown_until, Some(t + Duration::from_secs(30)));
        assert_eq!(state.error_count, 1);

        assert!(!pool.is_usable(0, t + Duration::from_secs(29)));
        assert!(pool.is_usable(0, t + Duration::from_secs(30)));
    }

    #[test]
    fn lapsed_cooldown_is_cleared_by_check() {
        let pool = pool(1);
        let t = Instant::now();
        pool.record_failure(0, ErrorClass::RateLimited, t);

        assert!(pool.is_usable(0, t + Duration::from_secs(61)));

        let state = pool.state(0).unwrap();
        assert_eq!(state.cooldown_until, None);
        assert!(!state.rate_limited);
        assert_eq!(state.error_count, 1, "counters survive expiry");
    }

    #[test]
    fn new_cooldown_overwrites_previous() {
        let pool = pool(1);
        let t = Instant::now();
        pool.record_failure(0, ErrorClass::InsufficientCredits, t);
        pool.record_failure(0, ErrorClass::Other, t + Duration::from_secs(5));

        let state = pool.state(0).unwrap();
        assert_eq!(state.cooldown_until, Some(t + Duration::from_secs(35)));
        assert_eq!(state.credits_until, Some(t + CREDITS_COOLDOWN));
        assert_eq!(state.error_count, 2);
    }

    #[test]
    fn credits_flag_outlives_shorter_overwrite() {
        let pool = pool(1);
        let t = Instant::now();
        pool.record_failure(0, ErrorClass::InsufficientCredits, t);
        pool.record_failure(0, ErrorClass::Other, t + Duration::from_secs(2));

        assert!(
            !pool.is_usable(0, t + Duration::from_secs(33)),
            "out-of-credits key must stay blocked after the shorter cooldown lapses"
        );
        let state = pool.state(0).unwrap();
        assert!(state.credits_exhausted);
        assert_eq!(state.cooldown_until, None, "the lapsed shared cooldown is cleared");

        assert!(!pool.is_usable(0, t + Duration::from_secs(1799)));
        assert!(pool.is_usable(0, t + CREDITS_COOLDOWN));
        assert!(!pool.state(0).unwrap().credits_exhausted);
    }

    #[test]
    fn rate_limit_flag_outlives_other_failure() {
        let pool = pool(1);
        let t = Instant::now();
        pool.record_failure(0, ErrorClass::RateLimited, t);
        pool.record_failure(0, ErrorClass::Other, t + Duration::from_secs(1));

        assert!(!pool.is_usable(0, t + Duration::from_secs(40)));
        assert!(pool.is_usable(0, t + RATE_LIMIT_COOLDOWN));
    }

    #[test]
    fn rate_limit_after_credits_keeps_credit_window() {
        let pool = pool(1);
        let t = Instant::now();
        pool.record_failure(0, ErrorClass::InsufficientCredits, t);
        pool.record_failure(0, ErrorClass::RateLimited, t + Duration::from_secs(10));

        assert!(!pool.is_usable(0, t + Duration::from_secs(120)));
        let state = pool.state(0).unwrap();
        assert!(state.credits_exhausted);
        assert!(!state.rate_limited, "rate-limit window lapsed on its own");
        assert_eq!(state.blocked_until(), Some(t + CREDITS_COOLDOWN));
    }

    #[test]
    fn all_unusable_falls_back_to_fewest_errors() {
        let pool = pool(3);
        let t = Instant::now();
        pool.record_failure(0, ErrorClass::RateLimited, t);
        pool.record_failure(0, ErrorClass::RateLimited, t);
        pool.record_failure(1, ErrorClass::InsufficientCredits, t);
        pool.record_failure(2, ErrorClass::Other, t);
        pool.record_failure(2, ErrorClass::Other, t);

        let selected = pool.select_key(t);
        assert_eq!(selected.index, 1);
    }

    #[test]
    fn fallback_ties_go_to_lowest_index() {
        let pool = pool(3);
        let t = Instant::now();
        for i in [2, 1, 0] {
            pool.record_failure(i, ErrorClass::InsufficientCredits, t);
        }
        assert_eq!(pool.select_key(t).index, 0);
    }

    #[test]
    fn reset_single_key_leaves_others() {
        let pool = pool(2);
        let t = Instant::now();
        pool.record_failure(0, ErrorClass::InsufficientCredits, t);
        pool.record_failure(1, ErrorClass::RateLimited, t);

        pool.reset(Some(0)).unwrap();

        let k1 = pool.state(0).unwrap();
        assert!(!k1.credits_exhausted);
        assert!(!k1.rate_limited);
        assert_eq!(k1.cooldown_until, None);
        assert_eq!(k1.error_count, 1);
        assert!(pool.is_usable(0, t));

        let k2 = pool.state(1).unwrap();
        assert!(k2.rate_limited);
        assert_eq!(k2.cooldown_until, Some(t + RATE_LIMIT_COOLDOWN));
    }

    #[test]
    fn reset_all_clears_every_key() {
        let pool = pool(3);
        let t = Instant::now();
        for i in 0..3 {
            pool.record_failure(i, ErrorClass::InsufficientCredits, t);
        }

        pool.reset(None).unwrap();

        for i in 0..3 {
            assert!(pool.is_usable(i, t), "key {i} should be usable");
        }
    }

    #[test]
    fn reset_unknown_index_is_not_found() {
        let pool = pool(2);
        let err = pool.reset(Some(5)).unwrap_err();
        assert!(matches!(err, Error::NotFound(5)));
    }

    #[test]
    fn unknown_index_is_never_usable_and_ignored_on_record() {
        let pool = pool(1);
        let t = Instant::now();
        assert!(!pool.is_usable(9, t));
        pool.record_failure(9, ErrorClass::Other, t);
        assert_eq!(pool.state(0).unwrap().error_count, 0);
    }

    #[test]
    fn success_records_usage() {
        let pool = pool(2);
        let t = Instant::now();
        pool.record_success(1, t);

        let state = pool.state(1).unwrap();
        assert_eq!(state.request_count, 1);
        assert_eq!(state.last_used_at, Some(t));
        assert_eq!(pool.state(0).unwrap().request_count, 0);
    }

    #[test]
    fn preview_masks_keys() {
        let pool = pool(1);
        assert_eq!(pool.preview(0), "sk-or-v1-t...0000");
        assert_eq!(pool.preview(3), "<unknown>");
    }
}
