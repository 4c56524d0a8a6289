//! Pipeline - bounded buffer between event producers and the store
//!
//! Producers (one per inbound balance change) push [`TransactionRecord`]s into
//! a lock-free ring buffer (crossbeam-queue::ArrayQueue). A single periodic
//! drain task pops up to `max_batch_size` records per tick and commits them
//! to the store as one transaction.
//!
//! ```text
//! ┌──────────────┐   enqueue    ┌──────────────┐  drain (tick)  ┌──────────────┐
//! │  Producers   │ ───────────▶ │  ArrayQueue  │ ─────────────▶ │    Store     │
//! │ (any thread) │              │  (bounded)   │  insert_batch  │ (SQLite tx)  │
//! └──────┬───────┘              └──────────────┘                └──────▲───────┘
//!        │            queue full: direct insert_one (spawned)          │
//!        └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Design
//!
//! - **Non-blocking enqueue**: a full queue never makes the producer wait;
//!   the record is written on its own instead (never dropped)
//! - **No overlapping drains**: at most one batch submission in flight; a
//!   tick that finds one running is skipped
//! - **Lossless shutdown**: the final drain waits for the in-flight batch,
//!   then empties the queue, falling back to single writes if a batch fails

use crossbeam_queue::ArrayQueue;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::StoreError;
use crate::models::TransactionRecord;
use crate::persistence::TransactionStore;

// ============================================================
// OUTCOMES
// ============================================================

/// Result of [`BatchPipeline::enqueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Buffered, will be written by the next drain
    Queued,
    /// Queue full, written directly on a store task
    Overflow,
    /// Pipeline is shutting down, record not accepted
    Rejected,
}

/// Result of a single [`BatchPipeline::drain`]
#[derive(Debug)]
pub enum DrainOutcome {
    /// Queue was empty, nothing submitted
    Empty,
    /// Batch committed
    Flushed(usize),
    /// Batch rolled back; the records are handed back to the caller
    Failed {
        batch: Vec<TransactionRecord>,
        error: StoreError,
    },
}

/// Totals from the shutdown drain
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub flushed_in_batches: usize,
    pub written_individually: usize,
    pub lost: usize,
}

// ============================================================
// PIPELINE STATISTICS
// ============================================================

#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Records accepted into the queue
    pub enqueued: AtomicU64,
    /// Queue full events (direct write fallback)
    pub overflowed: AtomicU64,
    /// Records refused after shutdown began
    pub rejected: AtomicU64,
    /// Batches committed
    pub batches_flushed: AtomicU64,
    /// Records committed through batches
    pub records_flushed: AtomicU64,
    /// Batches rolled back
    pub batch_failures: AtomicU64,
    /// Records given up after a failed write
    pub records_dropped: AtomicU64,
    /// Records written through insert_one (overflow or shutdown fallback)
    pub written_individually: AtomicU64,
    /// Timer ticks skipped because a batch was still in flight
    pub skipped_ticks: AtomicU64,
}

impl PipelineStats {
    #[inline]
    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            records_flushed: self.records_flushed.load(Ordering::Relaxed),
            batch_failures: self.batch_failures.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            written_individually: self.written_individually.load(Ordering::Relaxed),
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStatsSnapshot {
    pub enqueued: u64,
    pub overflowed: u64,
    pub rejected: u64,
    pub batches_flushed: u64,
    pub records_flushed: u64,
    pub batch_failures: u64,
    pub records_dropped: u64,
    pub written_individually: u64,
    pub skipped_ticks: u64,
}

impl std::fmt::Display for PipelineStatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pipeline Stats: enqueued={}, overflowed={}, rejected={}, batches={} ({} records), batch_failures={}, dropped={}, single_writes={}, skipped_ticks={}",
            self.enqueued,
            self.overflowed,
            self.rejected,
            self.batches_flushed,
            self.records_flushed,
            self.batch_failures,
            self.records_dropped,
            self.written_individually,
            self.skipped_ticks
        )
    }
}

// ============================================================
// SHUTDOWN SIGNALING
// ============================================================

/// Shutdown flag checked by every enqueue
#[derive(Debug)]
pub struct ShutdownSignal {
    shutdown: AtomicBool,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
        }
    }

    /// Request shutdown
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Check if shutdown was requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================
// ACTIVITY TRACKING
// ============================================================

/// Counts operations that shutdown must outlive: producers inside
/// `enqueue` and overflow writes running on store tasks.
#[derive(Debug, Default)]
struct ActivityCounter {
    pending: AtomicUsize,
    done: Notify,
}

impl ActivityCounter {
    fn start(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.done.notify_waiters();
        }
    }

    /// Count one operation until the returned guard is dropped
    fn enter(&self) -> ActivityGuard<'_> {
        self.start();
        ActivityGuard(self)
    }

    async fn wait_idle(&self) {
        loop {
            // Registered before the check, so a finish() in between is not missed
            let notified = self.done.notified();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct ActivityGuard<'a>(&'a ActivityCounter);

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

// ============================================================
// BATCH PIPELINE
// ============================================================

pub struct BatchPipeline {
    queue: ArrayQueue<TransactionRecord>,
    store: Arc<dyn TransactionStore>,
    /// Runtime used for overflow writes issued from producer threads
    runtime: Handle,
    /// Held for the whole of a batch submission
    in_flight: Mutex<()>,
    /// Producers between the shutdown check and the push/spawn
    producers: ActivityCounter,
    direct_writes: Arc<ActivityCounter>,
    shutdown: ShutdownSignal,
    stats: Arc<PipelineStats>,
}

impl BatchPipeline {
    /// Create a pipeline with a buffer of `capacity` records.
    ///
    /// # Panics
    /// If `capacity` is zero.
    pub fn new(store: Arc<dyn TransactionStore>, capacity: usize, runtime: Handle) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            store,
            runtime,
            in_flight: Mutex::new(()),
            producers: ActivityCounter::default(),
            direct_writes: Arc::new(ActivityCounter::default()),
            shutdown: ShutdownSignal::new(),
            stats: Arc::new(PipelineStats::default()),
        }
    }

    /// Hand a record to the pipeline without blocking.
    ///
    /// Safe to call from any thread, including threads outside the runtime.
    /// A record that is not rejected is either queued before the shutdown
    /// drain starts or its direct write is awaited by it.
    pub fn enqueue(&self, record: TransactionRecord) -> EnqueueOutcome {
        // Registered before the flag check; shutdown sets the flag and then
        // waits for this count to reach zero
        let _producer = self.producers.enter();
        if self.shutdown.is_shutdown_requested() {
            PipelineStats::incr(&self.stats.rejected);
            tracing::warn!(
                receiver = record.receiver(),
                sender = record.sender(),
                amount = record.amount(),
                "[Pipeline] Rejected transaction: shutting down"
            );
            return EnqueueOutcome::Rejected;
        }

        match self.queue.push(record) {
            Ok(()) => {
                PipelineStats::incr(&self.stats.enqueued);
                EnqueueOutcome::Queued
            }
            Err(record) => {
                PipelineStats::incr(&self.stats.overflowed);
                tracing::debug!(
                    capacity = self.queue.capacity(),
                    "[Pipeline] Queue full, writing transaction directly"
                );
                self.spawn_direct_write(record);
                EnqueueOutcome::Overflow
            }
        }
    }

    fn spawn_direct_write(&self, record: TransactionRecord) {
        let store = Arc::clone(&self.store);
        let stats = Arc::clone(&self.stats);
        let direct_writes = Arc::clone(&self.direct_writes);

        direct_writes.start();
        self.runtime.spawn(async move {
            match store.insert_one(&record).await {
                Ok(()) => PipelineStats::incr(&stats.written_individually),
                Err(e) => {
                    PipelineStats::incr(&stats.records_dropped);
                    tracing::error!(
                        receiver = record.receiver(),
                        sender = record.sender(),
                        amount = record.amount(),
                        error = %e,
                        "[Pipeline] Direct write failed, transaction lost"
                    );
                }
            }
            direct_writes.finish();
        });
    }

    /// Pop up to `max_batch_size` records and submit them as one batch.
    ///
    /// Does not block producers. Callers coordinate overlap through
    /// [`BatchPipeline::tick`] and [`BatchPipeline::shutdown_drain`].
    pub async fn drain(&self, max_batch_size: usize) -> DrainOutcome {
        let mut batch = Vec::with_capacity(max_batch_size.min(self.queue.len()));
        while batch.len() < max_batch_size {
            match self.queue.pop() {
                Some(record) => batch.push(record),
                None => break,
            }
        }

        if batch.is_empty() {
            return DrainOutcome::Empty;
        }

        match self.store.insert_batch(&batch).await {
            Ok(written) => {
                PipelineStats::incr(&self.stats.batches_flushed);
                PipelineStats::add(&self.stats.records_flushed, written);
                DrainOutcome::Flushed(written)
            }
            Err(error) => {
                PipelineStats::incr(&self.stats.batch_failures);
                DrainOutcome::Failed { batch, error }
            }
        }
    }

    /// One periodic drain cycle.
    ///
    /// Returns `None` when skipped because another submission is in flight.
    /// A failed batch is logged and not retried.
    pub async fn tick(&self, max_batch_size: usize) -> Option<DrainOutcome> {
        let Ok(_in_flight) = self.in_flight.try_lock() else {
            PipelineStats::incr(&self.stats.skipped_ticks);
            tracing::trace!("[Pipeline] Batch still in flight, tick skipped");
            return None;
        };

        let outcome = self.drain(max_batch_size).await;
        if let DrainOutcome::Failed { batch, error } = &outcome {
            PipelineStats::add(&self.stats.records_dropped, batch.len());
            tracing::error!(
                size = batch.len(),
                first_receiver = batch.first().map(|r| r.receiver()).unwrap_or_default(),
                error = %error,
                "[Pipeline] Batch write failed, records dropped"
            );
        }
        Some(outcome)
    }

    /// Stop accepting new records. Already-queued records stay queued.
    pub fn begin_shutdown(&self) {
        self.shutdown.request_shutdown();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_shutdown_requested()
    }

    /// Stop accepting records and empty the queue completely.
    ///
    /// Waits for producers already past the shutdown check and for any
    /// in-flight batch first. A batch that fails here is retried record by
    /// record so a transient batch error does not lose the whole batch.
    /// Also waits for outstanding overflow writes.
    pub async fn shutdown_drain(&self, max_batch_size: usize) -> ShutdownReport {
        self.begin_shutdown();
        self.producers.wait_idle().await;

        let _in_flight = self.in_flight.lock().await;
        let mut report = ShutdownReport::default();

        loop {
            match self.drain(max_batch_size).await {
                DrainOutcome::Empty => break,
                DrainOutcome::Flushed(n) => report.flushed_in_batches += n,
                DrainOutcome::Failed { batch, error } => {
                    tracing::warn!(
                        size = batch.len(),
                        error = %error,
                        "[Pipeline] Shutdown batch failed, writing records individually"
                    );
                    for record in batch {
                        match self.store.insert_one(&record).await {
                            Ok(()) => {
                                PipelineStats::incr(&self.stats.written_individually);
                                report.written_individually += 1;
                            }
                            Err(e) => {
                                PipelineStats::incr(&self.stats.records_dropped);
                                report.lost += 1;
                                tracing::error!(
                                    receiver = record.receiver(),
                                    sender = record.sender(),
                                    amount = record.amount(),
                                    error = %e,
                                    "[Pipeline] Transaction lost during shutdown"
                                );
                            }
                        }
                    }
                }
            }
        }

        self.direct_writes.wait_idle().await;
        report
    }

    /// Start the periodic drain on the current runtime
    pub fn spawn_drain_task(
        self: &Arc<Self>,
        interval: Duration,
        max_batch_size: usize,
    ) -> DrainTask {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let pipeline = Arc::clone(self);

        let handle = self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(
                interval_ms = interval.as_millis() as u64,
                max_batch_size,
                "[Pipeline] Drain task started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // Runs to completion; a stop request is seen on the next turn
                        pipeline.tick(max_batch_size).await;
                    }
                    _ = stop_rx.changed() => break,
                }
            }

            tracing::info!("[Pipeline] Drain task stopped");
        });

        DrainTask { stop_tx, handle }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Handle to the periodic drain task
pub struct DrainTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl DrainTask {
    /// Stop the timer and wait for the task to exit, including any batch
    /// it was submitting.
    pub async fn cancel(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!("[Pipeline] Drain task ended abnormally: {}", e);
        }
    }
}
