//! Batch dispatcher and demultiplexer.
//!
//! Pulls closed batches in submission order, runs the bulk provider
//! under a FIFO semaphore gate of `batch_max_concurrency` permits, and
//! matches each reply value back to its waiter.
//!
//! Matching is first-match-wins: for each returned value, the earliest
//! still-unmatched context that satisfies the matcher takes it. Values
//! nothing matches are logged and discarded; contexts no value matched
//! complete empty. A provider error fans out to every waiter of the
//! batch as the same shared error.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clock::Clock;

use super::batch::{Batch, BatchCloseReason};
use super::error::CollapseError;
use super::instruments::CollapserInstruments;
use super::pending::{Outcome, ParkedSinks, PendingItem};
use super::provider::BulkProvider;
use super::stats::StatsCell;

/// Predicate deciding whether a bulk value answers a context.
pub type ContextValueMatcher<C, V> = Arc<dyn Fn(&C, &V) -> bool + Send + Sync>;

pub(crate) struct Dispatcher<C, V> {
    pub(crate) batches: mpsc::UnboundedReceiver<Batch<C, V>>,
    pub(crate) provider: Arc<dyn BulkProvider<C, V>>,
    pub(crate) matcher: ContextValueMatcher<C, V>,
    pub(crate) gate: Arc<Semaphore>,
    pub(crate) emit: Handle,
    pub(crate) cancel: CancellationToken,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) instruments: Arc<CollapserInstruments>,
    pub(crate) stats: Arc<StatsCell>,
    pub(crate) parked: ParkedSinks<C, V>,
}

impl<C, V> Dispatcher<C, V>
where
    C: Clone + fmt::Debug + Send + 'static,
    V: fmt::Debug + Send + 'static,
{
    pub(crate) async fn run(mut self) {
        while let Some(batch) = self.batches.recv().await {
            if batch.reason == BatchCloseReason::Cancelled || self.cancel.is_cancelled() {
                debug!(
                    size = batch.len(),
                    reason = ?batch.reason,
                    "parking batch without dispatch"
                );
                self.parked.park_all(batch.items);
                continue;
            }

            let permit = self
                .gate
                .clone()
                .acquire_owned()
                .await
                .expect("collapser gate closed unexpectedly");

            // Cancel may have landed while we queued for a permit.
            if self.cancel.is_cancelled() {
                self.parked.park_all(batch.items);
                continue;
            }

            let started_at = self.clock.now();
            for item in &batch.items {
                self.instruments
                    .record_delay(started_at.saturating_duration_since(item.submitted_at));
            }

            let contexts: Vec<C> = batch.items.iter().map(|item| item.context.clone()).collect();
            debug!(
                size = contexts.len(),
                reason = ?batch.reason,
                batch_age_ms = started_at.saturating_duration_since(batch.opened_at).as_millis() as u64,
                "invoking bulk provider"
            );
            let call = self.provider.load(contexts);

            let settler = Settler {
                matcher: Arc::clone(&self.matcher),
                emit: self.emit.clone(),
                cancel: self.cancel.clone(),
                clock: Arc::clone(&self.clock),
                instruments: Arc::clone(&self.instruments),
                stats: Arc::clone(&self.stats),
                parked: self.parked.clone(),
            };
            tokio::spawn(async move {
                let _permit = permit;
                let result = call.await;
                settler.settle(batch, result);
            });
        }
    }
}

/// Everything needed to settle one batch once its bulk call returns.
struct Settler<C, V> {
    matcher: ContextValueMatcher<C, V>,
    emit: Handle,
    cancel: CancellationToken,
    clock: Arc<dyn Clock>,
    instruments: Arc<CollapserInstruments>,
    stats: Arc<StatsCell>,
    parked: ParkedSinks<C, V>,
}

impl<C, V> Settler<C, V>
where
    C: fmt::Debug + Send + 'static,
    V: fmt::Debug + Send + 'static,
{
    fn settle(self, batch: Batch<C, V>, result: Result<Vec<V>, super::error::BulkError>) {
        if self.cancel.is_cancelled() {
            debug!(size = batch.len(), "discarding bulk result after cancel");
            self.parked.park_all(batch.items);
            return;
        }

        let settled = match result {
            Ok(values) => {
                if values.is_empty() {
                    warn!(
                        waiters = batch.len(),
                        "bulk provider returned no values, completing batch empty"
                    );
                }
                self.demultiplex(batch.items, values)
            }
            Err(error) => {
                self.stats.provider_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %error, waiters = batch.len(), "bulk provider failed");
                let shared: Arc<dyn std::error::Error + Send + Sync> = Arc::from(error);
                batch
                    .items
                    .into_iter()
                    .map(|item| {
                        (
                            item,
                            Outcome::Error(CollapseError::Provider(Arc::clone(&shared))),
                        )
                    })
                    .collect()
            }
        };

        // Emission hop: waiters are fulfilled on the emit runtime, not
        // on the bulk provider's task.
        let clock = Arc::clone(&self.clock);
        let instruments = Arc::clone(&self.instruments);
        self.emit.spawn(async move {
            let emitted_at = clock.now();
            for (item, outcome) in settled {
                instruments
                    .record_completion(emitted_at.saturating_duration_since(item.submitted_at));
                // Each signal is emitted under the diagnostic context
                // captured at that item's subscription.
                let _installed = item.snapshot.install();
                if !item.complete(outcome) {
                    debug!("waiter went away before emission");
                }
            }
        });
    }

    /// Matches returned values to pending items, first match wins.
    fn demultiplex(
        &self,
        items: Vec<PendingItem<C, V>>,
        values: Vec<V>,
    ) -> Vec<(PendingItem<C, V>, Outcome<V>)> {
        let mut slots: Vec<Option<PendingItem<C, V>>> = items.into_iter().map(Some).collect();
        let mut settled = Vec::with_capacity(slots.len());

        for value in values {
            let hit = slots.iter_mut().find(|slot| {
                slot.as_ref()
                    .is_some_and(|item| (self.matcher)(&item.context, &value))
            });
            match hit {
                Some(slot) => {
                    self.stats.values_matched.fetch_add(1, Ordering::Relaxed);
                    let item = slot.take().expect("matched slot is occupied");
                    settled.push((item, Outcome::Value(value)));
                }
                None => {
                    self.stats.values_unmatched.fetch_add(1, Ordering::Relaxed);
                    warn!(value = ?value, "no pending context matched bulk value, discarding");
                }
            }
        }

        for slot in slots {
            if let Some(item) = slot {
                self.stats.completed_empty.fetch_add(1, Ordering::Relaxed);
                debug!(context = ?item.context, "no value matched context, completing empty");
                settled.push((item, Outcome::Empty));
            }
        }
        settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::collapser::pending::Emission;
    use crate::context::ContextSnapshot;
    use std::time::{Duration, Instant};
    use tokio::sync::oneshot;

    fn settler(matched: ContextValueMatcher<u32, String>) -> (Settler<u32, String>, Arc<StatsCell>) {
        let stats = Arc::new(StatsCell::default());
        (
            Settler {
                matcher: matched,
                emit: Handle::current(),
                cancel: CancellationToken::new(),
                clock: Arc::new(TokioClock),
                instruments: Arc::new(CollapserInstruments::disabled()),
                stats: Arc::clone(&stats),
                parked: ParkedSinks::new(),
            },
            stats,
        )
    }

    fn equality_matcher() -> ContextValueMatcher<u32, String> {
        Arc::new(|context, value: &String| value.parse::<u32>().map_or(false, |v| v == *context))
    }

    fn item(context: u32) -> (PendingItem<u32, String>, oneshot::Receiver<Emission<String>>) {
        let (sink, completion) = oneshot::channel();
        (
            PendingItem {
                context,
                sink,
                submitted_at: Instant::now(),
                snapshot: ContextSnapshot::default(),
            },
            completion,
        )
    }

    #[tokio::test]
    async fn first_match_wins_when_contexts_collide() {
        let (settler, stats) = settler(Arc::new(|_, _| true));
        let (first, _c1) = item(1);
        let (second, _c2) = item(2);

        let settled = settler.demultiplex(vec![first, second], vec!["x".to_string()]);
        // The single value lands on the earliest context; the other
        // completes empty.
        assert!(matches!(
            (&settled[0].0.context, &settled[0].1),
            (1, Outcome::Value(_))
        ));
        assert!(matches!((&settled[1].0.context, &settled[1].1), (2, Outcome::Empty)));
        assert_eq!(stats.snapshot().values_matched, 1);
        assert_eq!(stats.snapshot().completed_empty, 1);
    }

    #[tokio::test]
    async fn unmatched_values_are_discarded() {
        let (settler, stats) = settler(equality_matcher());
        let (first, _c1) = item(1);

        let settled = settler.demultiplex(vec![first], vec!["7".to_string(), "1".to_string()]);
        assert_eq!(settled.len(), 1);
        assert!(matches!(settled[0].1, Outcome::Value(_)));
        assert_eq!(stats.snapshot().values_unmatched, 1);
    }

    #[tokio::test]
    async fn provider_error_fans_out_to_every_waiter() {
        let (settler, stats) = settler(equality_matcher());
        let (first, c1) = item(1);
        let (second, c2) = item(2);
        let batch = Batch {
            items: vec![first, second],
            opened_at: Instant::now(),
            reason: BatchCloseReason::SizeReached,
        };

        settler.settle(batch, Err("bulk exploded".into()));

        let first_error = match c1.await.unwrap().outcome {
            Outcome::Error(CollapseError::Provider(cause)) => cause,
            other => panic!("unexpected outcome: {other:?}"),
        };
        let second_error = match c2.await.unwrap().outcome {
            Outcome::Error(CollapseError::Provider(cause)) => cause,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert!(Arc::ptr_eq(&first_error, &second_error));
        assert_eq!(stats.snapshot().provider_errors, 1);
    }

    #[tokio::test]
    async fn empty_response_completes_everything_empty() {
        let (settler, _stats) = settler(equality_matcher());
        let (first, c1) = item(1);
        let batch = Batch {
            items: vec![first],
            opened_at: Instant::now(),
            reason: BatchCloseReason::TimeExpired,
        };

        settler.settle(batch, Ok(Vec::new()));
        assert!(matches!(c1.await.unwrap().outcome, Outcome::Empty));
    }

    #[tokio::test]
    async fn cancelled_batches_are_parked_without_a_provider_call() {
        let invocations = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let provider = {
            let invocations = Arc::clone(&invocations);
            move |contexts: Vec<u32>| {
                invocations.fetch_add(1, Ordering::SeqCst);
                async move {
                    Ok::<_, super::super::error::BulkError>(
                        contexts.iter().map(u32::to_string).collect::<Vec<_>>(),
                    )
                }
            }
        };
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let parked = ParkedSinks::new();
        let dispatcher = Dispatcher {
            batches: batch_rx,
            provider: Arc::new(provider),
            matcher: equality_matcher(),
            gate: Arc::new(Semaphore::new(1)),
            emit: Handle::current(),
            cancel: CancellationToken::new(),
            clock: Arc::new(TokioClock),
            instruments: Arc::new(CollapserInstruments::disabled()),
            stats: Arc::new(StatsCell::default()),
            parked: parked.clone(),
        };
        tokio::spawn(dispatcher.run());

        let (pending, mut completion) = item(1);
        batch_tx
            .send(Batch {
                items: vec![pending],
                opened_at: Instant::now(),
                reason: BatchCloseReason::Cancelled,
            })
            .unwrap();
        tokio::task::yield_now().await;

        assert_eq!(parked.len(), 1);
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
        assert!(completion.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn gate_limits_inflight_bulk_calls() {
        let running = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let peak = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();

        let provider = {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            move |contexts: Vec<u32>| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, super::super::error::BulkError>(
                        contexts.iter().map(u32::to_string).collect(),
                    )
                }
            }
        };

        let dispatcher = Dispatcher {
            batches: batch_rx,
            provider: Arc::new(provider),
            matcher: equality_matcher(),
            gate: Arc::new(Semaphore::new(2)),
            emit: Handle::current(),
            cancel: CancellationToken::new(),
            clock: Arc::new(TokioClock),
            instruments: Arc::new(CollapserInstruments::disabled()),
            stats: Arc::new(StatsCell::default()),
            parked: ParkedSinks::new(),
        };
        tokio::spawn(dispatcher.run());

        let mut completions = Vec::new();
        for context in 0..6u32 {
            let (pending, completion) = item(context);
            completions.push(completion);
            batch_tx
                .send(Batch {
                    items: vec![pending],
                    opened_at: Instant::now(),
                    reason: BatchCloseReason::SizeReached,
                })
                .unwrap();
        }

        for completion in completions {
            let emission = completion.await.unwrap();
            assert!(matches!(emission.outcome, Outcome::Value(_)));
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
