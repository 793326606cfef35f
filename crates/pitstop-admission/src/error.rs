//! Admission error types.
//!
//! `AdmissionError` is transport-agnostic. The HTTP crate maps each variant
//! to a status code (400 / 429 / 500) and a JSON body.

use std::time::Duration;

use crate::controller::QuotaSnapshot;

/// Failure talking to the counter store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store rejected the command or the connection failed.
    #[error("counter store error: {0}")]
    Backend(String),

    /// The store did not answer within the configured deadline.
    #[error("counter store call timed out after {0:?}")]
    Timeout(Duration),

    /// The request was cancelled while waiting on the store.
    #[error("counter store call cancelled")]
    Cancelled,
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Why a request was not admitted.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// A mandatory identity signal is absent. No store call was made.
    #[error("missing {0}")]
    MissingIdentity(&'static str),

    /// The counter store failed. The request is blocked (fail-closed).
    #[error("admission check failed for {key}: {source}")]
    Store {
        key: String,
        #[source]
        source: StoreError,
    },

    /// A tier's count went past its ceiling.
    #[error("rate limit exceeded: {}", .0.label)]
    QuotaExceeded(QuotaSnapshot),
}

/// Invalid static admission configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("ceiling for {0} must be greater than zero")]
    ZeroCeiling(&'static str),

    #[error("store timeout must be greater than zero")]
    ZeroTimeout,

    #[error("{narrow} ceiling ({narrow_value}) must be lower than {broad} ceiling ({broad_value})")]
    CeilingOrder {
        narrow: &'static str,
        narrow_value: u64,
        broad: &'static str,
        broad_value: u64,
    },

    #[error("invalid public route prefix {0:?}: must start with '/'")]
    InvalidPrefix(String),
}
