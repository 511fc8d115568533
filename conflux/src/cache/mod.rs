//! Resilient asynchronous key/value caching.
//!
//! [`ReactiveCache`] is the uniform asynchronous get/put contract a
//! cache backend implements. [`ResilientCache`] wraps any delegate
//! with a per-operation deadline and a circuit breaker shared across
//! all of the cache's operations:
//!
//! ```text
//! get/put ──► breaker admission ──► deadline ──► delegate
//!                   │ open                │ expired
//!                   ▼                     ▼
//!           CallNotPermitted           Timeout
//!             (no delegate call)    (breaker failure)
//! ```

mod breaker;
mod error;
mod resilient;
mod timeout;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState, SlidingWindowType};
pub use error::CacheError;
pub use resilient::ResilientCache;
pub use timeout::{timeout_counter, with_deadline};

use futures::future::BoxFuture;

/// Asynchronous key/value cache.
///
/// `get` resolving to `Ok(None)` is a miss, not a failure. Boxed
/// futures keep the trait object-safe so wrappers and backends can be
/// swapped freely.
pub trait ReactiveCache: Send + Sync {
    /// Key type.
    type Key: Send + Sync;
    /// Value type.
    type Value: Send;

    /// Looks up `key`.
    fn get<'a>(
        &'a self,
        key: &'a Self::Key,
    ) -> BoxFuture<'a, Result<Option<Self::Value>, CacheError>>;

    /// Stores `value` under `key`.
    fn put<'a>(
        &'a self,
        key: Self::Key,
        value: Self::Value,
    ) -> BoxFuture<'a, Result<(), CacheError>>;
}
