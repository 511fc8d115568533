//! Single-writer batch aggregator.
//!
//! All mutations of the open batch happen inside one task: arrivals,
//! the size trigger, the max-wait timer, and cancellation are
//! serialized through its `select!` loop, so batch state needs no
//! locks. If a size trigger and a time trigger race, whichever the
//! loop observes first dispatches; the other finds the batch empty and
//! no-ops.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clock::Clock;

use super::batch::{Batch, BatchCloseReason};
use super::instruments::CollapserInstruments;
use super::pending::{ParkedSinks, PendingItem};
use super::stats::StatsCell;

/// Far enough ahead that a disabled timer branch never fires.
const IDLE_DEADLINE: std::time::Duration = std::time::Duration::from_secs(86_400);

pub(crate) struct Aggregator<C, V> {
    pub(crate) inbox: mpsc::UnboundedReceiver<PendingItem<C, V>>,
    pub(crate) batches: mpsc::UnboundedSender<Batch<C, V>>,
    pub(crate) batch_size: usize,
    pub(crate) max_wait: std::time::Duration,
    pub(crate) cancel: CancellationToken,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) instruments: Arc<CollapserInstruments>,
    pub(crate) stats: Arc<StatsCell>,
    pub(crate) parked: ParkedSinks<C, V>,
}

impl<C, V> Aggregator<C, V>
where
    C: Send + 'static,
    V: Send + 'static,
{
    pub(crate) async fn run(mut self) {
        self.collect().await;
        self.park_remaining().await;
    }

    /// Buffers arrivals into batches until cancelled or the collapser
    /// is dropped.
    async fn collect(&mut self) {
        let mut open: Vec<PendingItem<C, V>> = Vec::new();
        let mut opened_at: Instant = self.clock.now();
        let mut deadline: Option<tokio::time::Instant> = None;

        loop {
            let timer_at =
                deadline.unwrap_or_else(|| tokio::time::Instant::now() + IDLE_DEADLINE);
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    if !open.is_empty() {
                        debug!(
                            discarded = open.len(),
                            "closing open batch as cancelled, no dispatch"
                        );
                        let batch = Batch {
                            items: std::mem::take(&mut open),
                            opened_at,
                            reason: BatchCloseReason::Cancelled,
                        };
                        // The dispatcher parks cancelled batches; if it
                        // is already gone, park here.
                        if let Err(returned) = self.batches.send(batch) {
                            self.parked.park_all(returned.0.items);
                        }
                    }
                    return;
                }

                arrival = self.inbox.recv() => {
                    match arrival {
                        Some(item) => {
                            self.stats.arrivals.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                            if open.is_empty() {
                                opened_at = self.clock.now();
                                deadline = Some(tokio::time::Instant::now() + self.max_wait);
                            }
                            open.push(item);
                            self.instruments.record_pending(open.len());
                            debug!(pending = open.len(), "buffered request");
                            if open.len() >= self.batch_size {
                                self.close(&mut open, opened_at, BatchCloseReason::SizeReached);
                                deadline = None;
                            }
                        }
                        // Collapser dropped; open sinks drop with us.
                        None => return,
                    }
                }

                _ = tokio::time::sleep_until(timer_at), if deadline.is_some() => {
                    deadline = None;
                    if !open.is_empty() {
                        self.close(&mut open, opened_at, BatchCloseReason::TimeExpired);
                    }
                }
            }
        }
    }

    /// Closes the open batch and hands it to the dispatcher.
    fn close(
        &self,
        open: &mut Vec<PendingItem<C, V>>,
        opened_at: Instant,
        reason: BatchCloseReason,
    ) {
        let items = std::mem::take(open);
        self.instruments.record_batch_size(items.len());
        self.instruments.record_pending(open.len());
        self.stats
            .batches_dispatched
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        debug!(size = items.len(), ?reason, "closing batch");

        let batch = Batch {
            items,
            opened_at,
            reason,
        };
        if self.batches.send(batch).is_err() {
            warn!("batch dispatcher is gone, dropping closed batch");
        }
    }

    /// After cancellation, arrivals are parked instead of batched so
    /// their waiters stay unresolved. Runs until the collapser drops.
    async fn park_remaining(&mut self) {
        while let Some(item) = self.inbox.recv().await {
            debug!("parking request received after cancel");
            self.parked.park(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::collapser::pending::Emission;
    use crate::context::ContextSnapshot;
    use std::time::Duration;
    use tokio::sync::oneshot;

    struct Harness {
        inbox: mpsc::UnboundedSender<PendingItem<u32, String>>,
        batches: mpsc::UnboundedReceiver<Batch<u32, String>>,
        cancel: CancellationToken,
        parked: ParkedSinks<u32, String>,
    }

    fn spawn_aggregator(batch_size: usize, max_wait: Duration) -> Harness {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let parked = ParkedSinks::new();
        let aggregator = Aggregator {
            inbox: inbox_rx,
            batches: batch_tx,
            batch_size,
            max_wait,
            cancel: cancel.clone(),
            clock: Arc::new(TokioClock),
            instruments: Arc::new(CollapserInstruments::disabled()),
            stats: Arc::new(StatsCell::default()),
            parked: parked.clone(),
        };
        tokio::spawn(aggregator.run());
        Harness {
            inbox: inbox_tx,
            batches: batch_rx,
            cancel,
            parked,
        }
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

    #[tokio::test(start_paused = true)]
    async fn size_trigger_closes_the_batch() {
        let mut harness = spawn_aggregator(2, Duration::from_millis(100));
        let (first, _c1) = item(1);
        let (second, _c2) = item(2);
        harness.inbox.send(first).unwrap();
        harness.inbox.send(second).unwrap();

        let batch = harness.batches.recv().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.reason, BatchCloseReason::SizeReached);
        assert_eq!(batch.items[0].context, 1);
        assert_eq!(batch.items[1].context, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn time_trigger_dispatches_a_partial_batch() {
        let mut harness = spawn_aggregator(4, Duration::from_millis(100));
        let (first, _c1) = item(1);
        harness.inbox.send(first).unwrap();

        let batch = harness.batches.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.reason, BatchCloseReason::TimeExpired);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_windows_dispatch_nothing() {
        let mut harness = spawn_aggregator(2, Duration::from_millis(100));
        let (first, _c1) = item(1);
        harness.inbox.send(first).unwrap();
        let _ = harness.batches.recv().await.unwrap();

        // Two further full windows with no arrivals: no batches.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(harness.batches.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_closes_the_open_batch_as_cancelled() {
        let mut harness = spawn_aggregator(3, Duration::from_millis(100));
        let (first, _c1) = item(1);
        harness.inbox.send(first).unwrap();
        tokio::task::yield_now().await;

        harness.cancel.cancel();

        let batch = harness.batches.recv().await.unwrap();
        assert_eq!(batch.reason, BatchCloseReason::Cancelled);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.items[0].context, 1);

        // Arrivals after cancel are parked, not batched.
        let (late, _c2) = item(2);
        harness.inbox.send(late).unwrap();
        tokio::task::yield_now().await;
        assert_eq!(harness.parked.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_parks_the_open_batch_when_dispatcher_is_gone() {
        let harness = spawn_aggregator(3, Duration::from_millis(100));
        let Harness {
            inbox,
            batches,
            cancel,
            parked,
        } = harness;
        let (first, _c1) = item(1);
        inbox.send(first).unwrap();
        tokio::task::yield_now().await;

        drop(batches);
        cancel.cancel();
        tokio::task::yield_now().await;

        assert_eq!(parked.len(), 1);
    }
}
