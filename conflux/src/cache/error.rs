//! Cache error taxonomy.

use std::time::Duration;

use thiserror::Error;

/// Failure of a resilient cache operation.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The operation exceeded its deadline.
    #[error("cache operation timed out after {elapsed:?}")]
    Timeout {
        /// The deadline that was exceeded.
        elapsed: Duration,
    },

    /// The circuit breaker is open; the delegate was not called.
    #[error("call not permitted, circuit open for cache {cache}")]
    CallNotPermitted {
        /// Name of the cache whose breaker rejected the call.
        cache: String,
    },

    /// The delegate cache failed.
    #[error("cache delegate failed: {0}")]
    Delegate(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl CacheError {
    /// Wraps a delegate failure.
    pub fn delegate(error: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        Self::Delegate(error.into())
    }
}
