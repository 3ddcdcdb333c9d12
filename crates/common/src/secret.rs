//! Secret wrapper for credentials
//!
//! API keys travel through the scheduler inside `Secret`, so an accidental
//! `{:?}` in a log line or a status payload never reveals the full value.

use std::fmt;
use zeroize::Zeroize;

/// Number of leading characters kept by [`Secret::preview`].
const PREVIEW_HEAD: usize = 10;

/// Number of trailing characters kept by [`Secret::preview`].
const PREVIEW_TAIL: usize = 4;

/// Sensitive value - redacted in Debug/Display/logs
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Create a new secret value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T: Zeroize + AsRef<str>> Secret<T> {
    /// Masked preview for status reports: `sk-or-v1-a...9f3c`.
    ///
    /// Values too short to hide a middle section are fully masked, so the
    /// preview never contains the whole secret.
    pub fn preview(&self) -> String {
        let value = self.0.as_ref();
        let len = value.chars().count();
        if len <= PREVIEW_HEAD + PREVIEW_TAIL {
            return "***".to_string();
        }
        let head: String = value.chars().take(PREVIEW_HEAD).collect();
        let tail: String = value.chars().skip(len - PREVIEW_TAIL).collect();
        format!("{head}...{tail}")
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
