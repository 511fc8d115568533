//! Shared circuit breaker.
//!
//! One breaker guards all operations of a resilient cache. Outcomes
//! feed a sliding window; when a full window's failure rate reaches
//! the threshold the circuit opens and calls fail fast without
//! touching the delegate. After a cooling-off period a bounded number
//! of trial calls probe the delegate; their outcomes decide whether
//! the circuit closes again or re-opens.
//!
//! ```text
//!            failure rate >= threshold
//!   CLOSED ────────────────────────────► OPEN
//!     ▲                                   │ wait_duration elapses
//!     │ trials healthy                    ▼
//!     └───────────────────────────── HALF_OPEN
//!                    trials unhealthy ──► OPEN
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::clock::{Clock, TokioClock};
use crate::metrics::{Counter, MetricId, MetricsRegistry, Tag};

use super::error::CacheError;

/// Observable breaker state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through; outcomes are recorded.
    Closed,
    /// Calls fail fast with `CallNotPermitted`.
    Open,
    /// A bounded number of trial calls are admitted.
    HalfOpen,
}

/// How the outcome window slides.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlidingWindowType {
    /// Keep the last `sliding_window_size` outcomes.
    CountBased,
    /// Keep outcomes from the last `sliding_window_size` seconds.
    TimeBased,
}

/// Circuit breaker settings.
#[derive(Clone, Debug)]
pub struct BreakerConfig {
    /// Failure rate (0.0..=1.0) at which the circuit opens.
    pub failure_rate_threshold: f64,
    /// Window slide strategy.
    pub sliding_window_type: SlidingWindowType,
    /// Window size: call count or seconds, per the window type.
    pub sliding_window_size: usize,
    /// Outcomes required before the failure rate is evaluated.
    pub minimum_calls: usize,
    /// Trial calls admitted while half-open.
    pub permitted_calls_in_half_open: usize,
    /// Cooling-off period before an open circuit admits trials.
    pub wait_duration_in_open: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            sliding_window_type: SlidingWindowType::CountBased,
            sliding_window_size: 100,
            minimum_calls: 100,
            permitted_calls_in_half_open: 10,
            wait_duration_in_open: Duration::from_secs(60),
        }
    }
}

/// Sliding window of call outcomes.
#[derive(Debug)]
struct OutcomeWindow {
    kind: SlidingWindowType,
    size: usize,
    /// (recorded_at, failed) pairs, oldest first.
    samples: VecDeque<(Instant, bool)>,
}

impl OutcomeWindow {
    fn new(kind: SlidingWindowType, size: usize) -> Self {
        Self {
            kind,
            size,
            samples: VecDeque::with_capacity(size),
        }
    }

    fn record(&mut self, now: Instant, failed: bool) {
        self.samples.push_back((now, failed));
        self.evict(now);
    }

    fn evict(&mut self, now: Instant) {
        match self.kind {
            SlidingWindowType::CountBased => {
                while self.samples.len() > self.size {
                    self.samples.pop_front();
                }
            }
            SlidingWindowType::TimeBased => {
                let horizon = Duration::from_secs(self.size as u64);
                while let Some((at, _)) = self.samples.front() {
                    if now.saturating_duration_since(*at) > horizon {
                        self.samples.pop_front();
                    } else {
                        break;
                    }
                }
            }
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let failures = self.samples.iter().filter(|(_, failed)| *failed).count();
        failures as f64 / self.samples.len() as f64
    }

    /// Whether the window carries enough outcomes to judge.
    fn is_evaluable(&self, minimum_calls: usize) -> bool {
        let full = match self.kind {
            SlidingWindowType::CountBased => self.samples.len() >= self.size,
            SlidingWindowType::TimeBased => true,
        };
        full && self.samples.len() >= minimum_calls
    }
}

#[derive(Debug)]
enum Machine {
    Closed { window: OutcomeWindow },
    Open { since: Instant },
    HalfOpen { admitted: usize, successes: usize, failures: usize },
}

/// Failure-rate gate shared by all operations of one cache.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    machine: Mutex<Machine>,
    successful: Counter,
    failed: Counter,
    rejected: Counter,
}

impl CircuitBreaker {
    /// Creates a breaker for `name`, registering its counters in
    /// `registry` under both naming schemes.
    pub fn new(name: impl Into<String>, config: BreakerConfig, registry: &MetricsRegistry) -> Self {
        Self::with_clock(name, config, registry, Arc::new(TokioClock))
    }

    /// Like [`new`](Self::new) with an explicit time source.
    pub fn with_clock(
        name: impl Into<String>,
        config: BreakerConfig,
        registry: &MetricsRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let name = name.into();
        let window = OutcomeWindow::new(config.sliding_window_type, config.sliding_window_size);
        Self {
            successful: circuit_counter(registry, &name, "successful"),
            failed: circuit_counter(registry, &name, "failed"),
            rejected: circuit_counter(registry, &name, "rejected"),
            name,
            config,
            clock,
            machine: Mutex::new(Machine::Closed { window }),
        }
    }

    /// Admits or rejects a call.
    ///
    /// Rejections increment the rejection counter and carry the cache
    /// name; no delegate work may happen after a rejection.
    pub fn try_acquire(&self) -> Result<(), CacheError> {
        let mut machine = self.machine.lock().unwrap();
        match &mut *machine {
            Machine::Closed { .. } => Ok(()),
            Machine::Open { since } => {
                let now = self.clock.now();
                if now.saturating_duration_since(*since) >= self.config.wait_duration_in_open {
                    info!(cache = %self.name, "circuit half-open, admitting trial calls");
                    *machine = Machine::HalfOpen {
                        admitted: 1,
                        successes: 0,
                        failures: 0,
                    };
                    Ok(())
                } else {
                    self.reject()
                }
            }
            Machine::HalfOpen { admitted, .. } => {
                if *admitted < self.config.permitted_calls_in_half_open {
                    *admitted += 1;
                    Ok(())
                } else {
                    self.reject()
                }
            }
        }
    }

    fn reject(&self) -> Result<(), CacheError> {
        self.rejected.increment();
        debug!(cache = %self.name, "circuit open, rejecting call");
        Err(CacheError::CallNotPermitted {
            cache: self.name.clone(),
        })
    }

    /// Records a successful delegate call.
    pub fn record_success(&self) {
        self.successful.increment();
        self.on_outcome(false);
    }

    /// Records a failed delegate call (including timeouts).
    pub fn record_failure(&self) {
        self.failed.increment();
        self.on_outcome(true);
    }

    fn on_outcome(&self, call_failed: bool) {
        let now = self.clock.now();
        let mut machine = self.machine.lock().unwrap();
        match &mut *machine {
            Machine::Closed { window } => {
                window.record(now, call_failed);
                if window.is_evaluable(self.config.minimum_calls)
                    && window.failure_rate() >= self.config.failure_rate_threshold
                {
                    info!(
                        cache = %self.name,
                        failure_rate = window.failure_rate(),
                        "failure rate over threshold, opening circuit"
                    );
                    *machine = Machine::Open { since: now };
                }
            }
            Machine::HalfOpen { successes, failures, .. } => {
                if call_failed {
                    *failures += 1;
                } else {
                    *successes += 1;
                }
                let completed = *successes + *failures;
                if completed >= self.config.permitted_calls_in_half_open {
                    let rate = *failures as f64 / completed as f64;
                    if rate >= self.config.failure_rate_threshold {
                        info!(cache = %self.name, failure_rate = rate, "trials failed, re-opening circuit");
                        *machine = Machine::Open { since: now };
                    } else {
                        info!(cache = %self.name, "trials healthy, closing circuit");
                        *machine = Machine::Closed {
                            window: OutcomeWindow::new(
                                self.config.sliding_window_type,
                                self.config.sliding_window_size,
                            ),
                        };
                    }
                }
            }
            // A call admitted before the transition finished later;
            // its outcome no longer participates in any decision.
            Machine::Open { .. } => {}
        }
    }

    /// Current state, for reporting.
    pub fn state(&self) -> CircuitState {
        match &*self.machine.lock().unwrap() {
            Machine::Closed { .. } => CircuitState::Closed,
            Machine::Open { .. } => CircuitState::Open,
            Machine::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Successful calls recorded so far.
    pub fn successful_calls(&self) -> f64 {
        self.successful.value()
    }

    /// Failed calls recorded so far.
    pub fn failed_calls(&self) -> f64 {
        self.failed.value()
    }

    /// Calls rejected while the circuit was open or half-open.
    pub fn rejected_calls(&self) -> f64 {
        self.rejected.value()
    }
}

/// Breaker counter under both schemes:
/// `reactive-cache.<name>.circuit.<kind>` and
/// `cache_circuit_<kind>{name=<name>}`.
fn circuit_counter(registry: &MetricsRegistry, cache_name: &str, kind: &str) -> Counter {
    let id = MetricId::builder()
        .name(format!("cache_circuit_{kind}"))
        .hierarchical_name(format!("reactive-cache.{cache_name}.circuit"))
        .tag(Tag::new("name", cache_name))
        .build();
    registry.qualified_counter(&id, kind, "")
}
