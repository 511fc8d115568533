//! Fan-out request collapser.
//!
//! Collapses many concurrent single-item requests into bulk calls to a
//! downstream provider, then demultiplexes the bulk results back to
//! the original callers.
//!
//! # Architecture
//!
//! ```text
//! fetch(ctx) ──┐
//!              │   enqueue                 closed batches
//! fetch(ctx) ──┼────────────► Aggregator ───────────────► Dispatcher
//!              │             (single-writer,             (semaphore gate,
//! fetch(ctx) ──┘              size + max-wait             bulk call, demux)
//!                             triggers)                        │
//!              ◄───────────────────────────────────────────────┘
//!                     per-waiter emission on the emit runtime
//! ```
//!
//! A request subscribes when its future is first polled: the item is
//! stamped, its diagnostic context snapshotted, and it joins the open
//! batch. Batches close on size or on the max-wait timer, whichever
//! observes a non-empty batch first; empty windows dispatch nothing.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use conflux::collapser::FanOutCollapser;
//!
//! let collapser = FanOutCollapser::collapse_calls_over(|ids: Vec<u64>| async move {
//!         Ok(lookup_bulk(ids).await?)
//!     })
//!     .context_value_matcher(|id, user: &User| user.id == *id)
//!     .batch_size(32)
//!     .maximum_wait_time(Duration::from_millis(20))
//!     .batch_max_concurrency(4)
//!     .build();
//!
//! let user = collapser.fetch(42).await?;
//! ```

mod aggregator;
mod batch;
mod config;
mod dispatcher;
mod error;
mod instruments;
mod pending;
mod provider;
mod stats;

pub use batch::BatchCloseReason;
pub use config::{CollapserConfig, DEFAULT_BATCH_MAX_CONCURRENCY, DEFAULT_BATCH_SIZE};
pub use dispatcher::ContextValueMatcher;
pub use error::{BulkError, CollapseError, SharedBulkError};
pub use provider::BulkProvider;
pub use stats::CollapserStats;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::clock::{Clock, TokioClock};
use crate::context::ContextSnapshot;
use crate::metrics::{MetricId, MetricsRegistry};

use aggregator::Aggregator;
use dispatcher::Dispatcher;
use instruments::CollapserInstruments;
use pending::{Outcome, ParkedSinks, PendingItem};
use stats::StatsCell;

/// Collapses single-item requests into bulk provider calls.
///
/// Cloning is cheap; clones share the same batching pipeline.
pub struct FanOutCollapser<C, V> {
    inner: Arc<Inner<C, V>>,
}

impl<C, V> Clone for FanOutCollapser<C, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<C, V> {
    inbox: mpsc::UnboundedSender<PendingItem<C, V>>,
    cancel: CancellationToken,
    clock: Arc<dyn Clock>,
    stats: Arc<StatsCell>,
    // Keeps post-cancel sinks alive so their waiters stay unresolved
    // for as long as the collapser itself does.
    _parked: ParkedSinks<C, V>,
}

impl<C, V> FanOutCollapser<C, V>
where
    C: Clone + fmt::Debug + Send + 'static,
    V: fmt::Debug + Send + 'static,
{
    /// Starts building a collapser over the given bulk provider.
    pub fn collapse_calls_over(
        provider: impl BulkProvider<C, V> + 'static,
    ) -> FanOutCollapserBuilder<C, V> {
        FanOutCollapserBuilder {
            provider: Arc::new(provider),
            matcher: None,
            batch_size: DEFAULT_BATCH_SIZE,
            max_wait_time: None,
            batch_max_concurrency: DEFAULT_BATCH_MAX_CONCURRENCY,
            scheduler: None,
            batch_scheduler: None,
            emit_scheduler: None,
            instruments: CollapserInstruments::disabled(),
            clock: Arc::new(TokioClock),
        }
    }

    /// Requests the value for `context`.
    ///
    /// The returned future is lazy: nothing is enqueued until it is
    /// first polled. It resolves to:
    ///
    /// - `Ok(Some(value))` when a bulk value matched the context,
    /// - `Ok(None)` when the batch completed without a matching value,
    /// - `Err(CollapseError::Provider(_))` when the bulk call failed,
    /// - `Err(CollapseError::Cancelled)` when the collapser was
    ///   dropped after cancellation.
    ///
    /// The diagnostic context active at first poll is reinstated on
    /// the caller's thread when the future resolves.
    pub fn fetch(
        &self,
        context: C,
    ) -> impl Future<Output = Result<Option<V>, CollapseError>> + Send + 'static {
        let inner = Arc::clone(&self.inner);
        async move {
            let snapshot = ContextSnapshot::capture();
            let submitted_at = inner.clock.now();
            let (sink, completion) = oneshot::channel();
            let item = PendingItem {
                context,
                sink,
                submitted_at,
                snapshot,
            };
            if inner.inbox.send(item).is_err() {
                return Err(CollapseError::Cancelled);
            }
            match completion.await {
                Ok(emission) => {
                    emission.snapshot.make_current();
                    match emission.outcome {
                        Outcome::Value(value) => Ok(Some(value)),
                        Outcome::Empty => Ok(None),
                        Outcome::Error(error) => Err(error),
                    }
                }
                Err(_) => Err(CollapseError::Cancelled),
            }
        }
    }

    /// Shuts the collapser down.
    ///
    /// Idempotent and global for this collapser: the open batch is
    /// discarded without dispatch, later `fetch` futures never
    /// resolve while the collapser lives, and in-flight bulk calls
    /// run to completion with their results discarded.
    pub fn cancel(&self) {
        if !self.inner.cancel.is_cancelled() {
            info!("cancelling request collapser");
            self.inner.cancel.cancel();
        }
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Snapshot of the collapser's operational counters.
    pub fn stats(&self) -> CollapserStats {
        self.inner.stats.snapshot()
    }
}

/// Builder for [`FanOutCollapser`].
pub struct FanOutCollapserBuilder<C, V> {
    provider: Arc<dyn BulkProvider<C, V>>,
    matcher: Option<ContextValueMatcher<C, V>>,
    batch_size: usize,
    max_wait_time: Option<Duration>,
    batch_max_concurrency: usize,
    scheduler: Option<Handle>,
    batch_scheduler: Option<Handle>,
    emit_scheduler: Option<Handle>,
    instruments: CollapserInstruments,
    clock: Arc<dyn Clock>,
}

impl<C, V> FanOutCollapserBuilder<C, V>
where
    C: Clone + fmt::Debug + Send + 'static,
    V: fmt::Debug + Send + 'static,
{
    /// Predicate matching a bulk value back to a context. Required.
    pub fn context_value_matcher(
        mut self,
        matcher: impl Fn(&C, &V) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.matcher = Some(Arc::new(matcher));
        self
    }

    /// Number of items that closes a batch immediately. Default 1.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Longest time a batch may collect before dispatching. Required.
    pub fn maximum_wait_time(mut self, max_wait_time: Duration) -> Self {
        self.max_wait_time = Some(max_wait_time);
        self
    }

    /// Upper bound on concurrently running bulk calls. Default 1.
    pub fn batch_max_concurrency(mut self, batch_max_concurrency: usize) -> Self {
        self.batch_max_concurrency = batch_max_concurrency;
        self
    }

    /// Runtime the aggregator task runs on. Defaults to the current
    /// runtime at build time.
    pub fn scheduler(mut self, handle: Handle) -> Self {
        self.scheduler = Some(handle);
        self
    }

    /// Runtime bulk calls run on. Defaults to the current runtime.
    pub fn batch_scheduler(mut self, handle: Handle) -> Self {
        self.batch_scheduler = Some(handle);
        self
    }

    /// Runtime emissions run on. Defaults to the current runtime.
    pub fn emit_scheduler(mut self, handle: Handle) -> Self {
        self.emit_scheduler = Some(handle);
        self
    }

    /// Binds collapser metrics to `registry` under `id`.
    pub fn metrics(mut self, registry: &MetricsRegistry, id: MetricId) -> Self {
        self.instruments = CollapserInstruments::new(registry, &id);
        self
    }

    /// Overrides the time source used for item timing metrics.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Builds the collapser and starts its aggregator and dispatcher.
    ///
    /// # Panics
    ///
    /// Panics if the matcher or maximum wait time is missing, if a
    /// size or concurrency bound is zero, or if called outside a tokio
    /// runtime without explicit scheduler handles.
    pub fn build(self) -> FanOutCollapser<C, V> {
        let matcher = self
            .matcher
            .expect("context_value_matcher is required");
        let config = CollapserConfig {
            batch_size: self.batch_size,
            max_wait_time: self
                .max_wait_time
                .expect("maximum_wait_time is required"),
            batch_max_concurrency: self.batch_max_concurrency,
        };
        config.validate();

        let scheduler = self.scheduler.unwrap_or_else(Handle::current);
        let batch_scheduler = self.batch_scheduler.unwrap_or_else(Handle::current);
        let emit_scheduler = self.emit_scheduler.unwrap_or_else(Handle::current);

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let instruments = Arc::new(self.instruments);
        let stats = Arc::new(StatsCell::default());
        let parked = ParkedSinks::new();

        let aggregator = Aggregator {
            inbox: inbox_rx,
            batches: batch_tx,
            batch_size: config.batch_size,
            max_wait: config.max_wait_time,
            cancel: cancel.clone(),
            clock: Arc::clone(&self.clock),
            instruments: Arc::clone(&instruments),
            stats: Arc::clone(&stats),
            parked: parked.clone(),
        };
        scheduler.spawn(aggregator.run());

        let dispatcher = Dispatcher {
            batches: batch_rx,
            provider: self.provider,
            matcher,
            gate: Arc::new(Semaphore::new(config.batch_max_concurrency)),
            emit: emit_scheduler,
            cancel: cancel.clone(),
            clock: Arc::clone(&self.clock),
            instruments,
            stats: Arc::clone(&stats),
            parked: parked.clone(),
        };
        batch_scheduler.spawn(dispatcher.run());

        info!(
            batch_size = config.batch_size,
            max_wait_ms = config.max_wait_time.as_millis() as u64,
            max_concurrency = config.batch_max_concurrency,
            "request collapser started"
        );

        FanOutCollapser {
            inner: Arc::new(Inner {
                inbox: inbox_tx,
                cancel,
                clock: self.clock,
                stats,
                _parked: parked,
            }),
        }
    }
}

impl<C, V> fmt::Debug for FanOutCollapser<C, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanOutCollapser")
            .field("cancelled", &self.inner.cancel.is_cancelled())
            .finish()
    }
}
