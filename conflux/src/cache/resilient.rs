//! Resilient cache wrapper.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::info;

use crate::metrics::{Counter, MetricsRegistry};

use super::breaker::{BreakerConfig, CircuitBreaker};
use super::error::CacheError;
use super::timeout::{timeout_counter, with_deadline};
use super::ReactiveCache;

/// Delegating cache with per-operation timeout and a shared circuit
/// breaker.
///
/// Semantics match the delegate while the breaker is closed and the
/// call beats the deadline. Delegate failures and timeouts record as
/// breaker failures; an open breaker rejects calls before the
/// deadline or the delegate is ever involved.
pub struct ResilientCache<C> {
    delegate: C,
    cache_name: String,
    timeout: Duration,
    breaker: Arc<CircuitBreaker>,
    get_timeouts: Counter,
    put_timeouts: Counter,
}

impl<C: ReactiveCache> ResilientCache<C> {
    /// Wraps `delegate` under `cache_name`.
    ///
    /// The breaker and the timeout counters register their metrics in
    /// `registry` keyed by the cache name.
    pub fn new(
        delegate: C,
        cache_name: impl Into<String>,
        timeout: Duration,
        breaker_config: BreakerConfig,
        registry: &MetricsRegistry,
    ) -> Self {
        let cache_name = cache_name.into();
        info!(
            cache = %cache_name,
            timeout_ms = timeout.as_millis() as u64,
            "wrapping cache with timeout and circuit breaker"
        );
        Self {
            breaker: Arc::new(CircuitBreaker::new(&cache_name, breaker_config, registry)),
            get_timeouts: timeout_counter(registry, &cache_name, "get"),
            put_timeouts: timeout_counter(registry, &cache_name, "put"),
            delegate,
            cache_name,
            timeout,
        }
    }

    /// The breaker shared by this cache's operations.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Runs one operation through the breaker and the deadline.
    async fn guarded<T>(
        &self,
        operation: &'static str,
        timeouts: &Counter,
        call: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        self.breaker.try_acquire()?;
        match with_deadline(self.timeout, timeouts, &self.cache_name, operation, call).await {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            }
            Err(error) => {
                self.breaker.record_failure();
                Err(error)
            }
        }
    }
}

impl<C: ReactiveCache> ReactiveCache for ResilientCache<C> {
    type Key = C::Key;
    type Value = C::Value;

    fn get<'a>(
        &'a self,
        key: &'a Self::Key,
    ) -> BoxFuture<'a, Result<Option<Self::Value>, CacheError>> {
        Box::pin(self.guarded("get", &self.get_timeouts, self.delegate.get(key)))
    }

    fn put<'a>(
        &'a self,
        key: Self::Key,
        value: Self::Value,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(self.guarded("put", &self.put_timeouts, self.delegate.put(key, value)))
    }
}
