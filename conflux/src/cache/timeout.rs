//! Deadline operator for cache calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::metrics::{Counter, MetricId, MetricsRegistry, Tag};

use super::error::CacheError;

/// Runs `call` under `deadline`.
///
/// Signals arriving before the deadline pass through unchanged. On
/// expiry the call fails with [`CacheError::Timeout`] and the
/// per-operation timeout counter is incremented.
pub async fn with_deadline<T>(
    deadline: Duration,
    timeouts: &Counter,
    cache_name: &str,
    operation: &str,
    call: impl Future<Output = Result<T, CacheError>>,
) -> Result<T, CacheError> {
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => {
            timeouts.increment();
            warn!(
                cache = cache_name,
                operation,
                deadline_ms = deadline.as_millis() as u64,
                "cache operation timed out"
            );
            Err(CacheError::Timeout { elapsed: deadline })
        }
    }
}

/// Timeout counter for one (cache, operation) pair, registered as
/// `reactive-cache.<name>.<operation>.timeout` or
/// `cache_request_timeouts{name,operation}` per the registry mode.
pub fn timeout_counter(
    registry: &MetricsRegistry,
    cache_name: &str,
    operation: &str,
) -> Counter {
    let id = MetricId::builder()
        .name("cache_request_timeouts")
        .hierarchical_name(format!("reactive-cache.{cache_name}.{operation}"))
        .tag(Tag::new("name", cache_name))
        .tag(Tag::new("operation", operation))
        .build();
    registry.qualified_counter(&id, "timeout", "")
}
