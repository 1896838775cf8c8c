//! Asynchronous batched persistence.
//!
//! Producers (the resolver, on provider success) enqueue without blocking;
//! a single consumer task drains the queue to the store in bulk. A drain is
//! triggered when either the queue reaches the flush threshold or the
//! debounce interval has elapsed since the first still-unflushed item was
//! enqueued. Because only the consumer task ever drains, drains are mutually
//! exclusive by construction.
//!
//! Failed drains never discard items: the batch is pushed back to the front
//! of the queue (preserving order) and another drain is scheduled after the
//! retry delay. On shutdown the consumer processes whatever is still queued
//! before exiting.

use super::RecordStore;
use crate::{stats::StatsCollector, types::BatchItem};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

/// Configuration for the batch write queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Queue length that triggers an immediate drain (default: 50)
    pub flush_threshold: usize,
    /// Milliseconds after the first unflushed item before a drain runs
    /// regardless of queue length (default: 2000)
    pub debounce_ms: u64,
    /// Milliseconds to wait before retrying a failed drain (default: 1000)
    pub retry_delay_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { flush_threshold: 50, debounce_ms: 2000, retry_delay_ms: 1000 }
    }
}

struct QueueState {
    items: VecDeque<BatchItem>,
    /// When the oldest still-unflushed item was enqueued (debounce anchor).
    oldest_enqueued_at: Option<Instant>,
}

/// The shared queue half of the batch writer. Producers call
/// [`BatchWriter::enqueue`]; [`BatchWriter::run`] is the consumer task.
pub struct BatchWriter {
    state: Mutex<QueueState>,
    wakeup: Notify,
    config: BatchConfig,
}

impl BatchWriter {
    #[must_use]
    pub fn new(config: BatchConfig) -> Self {
        Self {
            state: Mutex::new(QueueState { items: VecDeque::new(), oldest_enqueued_at: None }),
            wakeup: Notify::new(),
            config,
        }
    }

    /// Appends a pending write. Non-blocking: takes a short lock, never I/O.
    pub fn enqueue(&self, item: BatchItem) {
        let len = {
            let mut state = self.state.lock();
            state.items.push_back(item);
            if state.oldest_enqueued_at.is_none() {
                state.oldest_enqueued_at = Some(Instant::now());
            }
            state.items.len()
        };

        // Wake the consumer: immediately at the threshold, otherwise so it
        // can arm the debounce timer for a fresh first item.
        if len >= self.config.flush_threshold || len == 1 {
            self.wakeup.notify_one();
        }
    }

    /// Current queue depth.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns `true` when nothing is waiting to be flushed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Computes how long the consumer should wait before the next drain.
    ///
    /// `None` means "sleep until enqueued"; `Some(ZERO)` means "drain now".
    fn next_wait(&self) -> Option<Duration> {
        let state = self.state.lock();

        if state.items.len() >= self.config.flush_threshold {
            return Some(Duration::ZERO);
        }

        state.oldest_enqueued_at.map(|oldest| {
            Duration::from_millis(self.config.debounce_ms).saturating_sub(oldest.elapsed())
        })
    }

    /// Takes up to one batch off the front of the queue.
    fn take_batch(&self) -> Vec<BatchItem> {
        let mut state = self.state.lock();
        let count = state.items.len().min(self.config.flush_threshold);
        let batch: Vec<BatchItem> = state.items.drain(..count).collect();

        state.oldest_enqueued_at =
            if state.items.is_empty() { None } else { Some(Instant::now()) };
        batch
    }

    /// Returns a failed batch to the front of the queue, preserving order.
    fn requeue_front(&self, batch: Vec<BatchItem>) {
        let mut state = self.state.lock();
        for item in batch.into_iter().rev() {
            state.items.push_front(item);
        }
        // Requeued items are overdue; make the next deadline fire promptly.
        state.oldest_enqueued_at = Some(Instant::now());
    }

    /// Drains one batch to the store. Returns `true` on success.
    async fn drain_once(&self, store: &dyn RecordStore, stats: &StatsCollector) -> bool {
        let batch = self.take_batch();
        if batch.is_empty() {
            return true;
        }

        let size = batch.len();
        match store.upsert_batch(&batch).await {
            Ok(applied) => {
                stats.record_batch_flush(applied);
                debug!(applied, "batch drain complete");
                true
            }
            Err(e) => {
                warn!(size, error = %e, "batch drain failed, requeueing items");
                stats.record_batch_retry();
                self.requeue_front(batch);
                false
            }
        }
    }

    /// The consumer loop. Runs until the shutdown signal, then drains any
    /// remaining items (one final attempt per batch) before exiting.
    pub async fn run(
        self: Arc<Self>,
        store: Arc<dyn RecordStore>,
        stats: Arc<StatsCollector>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let retry_delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            let wait = self.next_wait();

            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => break,

                // Always armed: a wakeup re-derives the deadline, so reaching
                // the threshold mid-debounce drains immediately on the next
                // pass instead of waiting out the timer.
                _ = self.wakeup.notified() => {}

                () = tokio::time::sleep(wait.unwrap_or(Duration::ZERO)), if wait.is_some() => {
                    // A completed drain that still finds queued items drains
                    // again immediately; a failed drain backs off first.
                    while !self.is_empty() {
                        if !self.drain_once(store.as_ref(), stats.as_ref()).await {
                            tokio::select! {
                                biased;
                                _ = shutdown_rx.recv() => {
                                    self.final_drain(store.as_ref(), stats.as_ref()).await;
                                    return;
                                }
                                () = tokio::time::sleep(retry_delay) => {}
                            }
                        }
                    }
                }
            }
        }

        self.final_drain(store.as_ref(), stats.as_ref()).await;
    }

    async fn final_drain(&self, store: &dyn RecordStore, stats: &StatsCollector) {
        while !self.is_empty() {
            if !self.drain_once(store, stats).await {
                warn!(
                    remaining = self.len(),
                    "shutdown drain failed; pending writes will be lost at exit"
                );
                return;
            }
        }
        info!("batch writer shutdown complete");
    }
}
