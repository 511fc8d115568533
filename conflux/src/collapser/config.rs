//! Collapser configuration.

use std::time::Duration;

/// Default batch size: dispatch every item on its own.
pub const DEFAULT_BATCH_SIZE: usize = 1;

/// Default number of concurrently running bulk calls.
pub const DEFAULT_BATCH_MAX_CONCURRENCY: usize = 1;

/// Validated collapser settings, immutable after the builder runs.
#[derive(Clone, Debug)]
pub struct CollapserConfig {
    /// Number of items that closes a batch immediately.
    pub batch_size: usize,
    /// Longest time the first item of a batch may wait before the
    /// batch is dispatched regardless of size.
    pub max_wait_time: Duration,
    /// Upper bound on concurrently running bulk calls.
    pub batch_max_concurrency: usize,
}

impl CollapserConfig {
    /// Validates the invariants the collapser relies on.
    ///
    /// # Panics
    ///
    /// Panics if `batch_size` or `batch_max_concurrency` is zero, or
    /// if `max_wait_time` is zero.
    pub(crate) fn validate(&self) {
        assert!(self.batch_size >= 1, "batch_size must be >= 1");
        assert!(
            self.max_wait_time > Duration::ZERO,
            "max_wait_time must be positive"
        );
        assert!(
            self.batch_max_concurrency >= 1,
            "batch_max_concurrency must be >= 1"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_config_passes() {
        CollapserConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            max_wait_time: Duration::from_millis(100),
            batch_max_concurrency: DEFAULT_BATCH_MAX_CONCURRENCY,
        }
        .validate();
    }

    #[test]
    #[should_panic(expected = "batch_size must be >= 1")]
    fn zero_batch_size_is_rejected() {
        CollapserConfig {
            batch_size: 0,
            max_wait_time: Duration::from_millis(100),
            batch_max_concurrency: 1,
        }
        .validate();
    }

    #[test]
    #[should_panic(expected = "max_wait_time must be positive")]
    fn zero_wait_time_is_rejected() {
        CollapserConfig {
            batch_size: 1,
            max_wait_time: Duration::ZERO,
            batch_max_concurrency: 1,
        }
        .validate();
    }
}
