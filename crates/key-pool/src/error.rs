//! Error types for scheduler operations

use provider::TransportError;

/// Errors from pool and scheduler operations.
///
/// Per-attempt transport failures are absorbed by the retry loop; only the
/// terminal outcome of a logical request reaches the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("retries exhausted: {last}")]
    RetriesExhausted {
        #[source]
        last: TransportError,
    },

    #[error("request abandoned by caller")]
    Abandoned,

    #[error("key not found: index {0}")]
    NotFound(usize),

    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Result alias for scheduler operations.
pub type Result<T> = std::result::Result<T, Error>;
