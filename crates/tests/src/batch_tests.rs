//! Batch write durability tests.
//!
//! The invariant under test: items handed to the batch queue are never lost.
//! A failed drain requeues its items at the front of the queue and a later
//! drain persists them, in the original order.

use crate::mock_infrastructure::FlakyStore;
use geodex_core::{
    stats::StatsCollector,
    store::{BatchConfig, BatchWriter, RecordStore},
    types::{BatchItem, GeoRecord},
};
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast;

fn item(key: &str) -> BatchItem {
    BatchItem::from_record(&GeoRecord::resolved(key, "test", Some("Testland"), None, None, None))
}

struct Harness {
    writer: Arc<BatchWriter>,
    store: Arc<FlakyStore>,
    stats: Arc<StatsCollector>,
    shutdown_tx: broadcast::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

fn start(config: BatchConfig, store: FlakyStore) -> Harness {
    let writer = Arc::new(BatchWriter::new(config));
    let store = Arc::new(store);
    let stats = Arc::new(StatsCollector::new());
    let (shutdown_tx, _) = broadcast::channel(1);

    let task = tokio::spawn(Arc::clone(&writer).run(
        Arc::clone(&store) as Arc<dyn RecordStore>,
        Arc::clone(&stats),
        shutdown_tx.subscribe(),
    ));

    Harness { writer, store, stats, shutdown_tx, task }
}

impl Harness {
    async fn stop(self) {
        self.shutdown_tx.send(()).expect("writer task should be alive");
        self.task.await.expect("writer task should join cleanly");
    }

    async fn wait_for_persisted(&self, count: usize, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if self.store.persisted_keys().len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

#[tokio::test]
async fn test_one_crashed_drain_loses_nothing() {
    // B-1 items with flush threshold B: only the debounce timer can flush,
    // and the first drain is scripted to fail.
    let threshold = 10;
    let harness = start(
        BatchConfig { flush_threshold: threshold, debounce_ms: 50, retry_delay_ms: 20 },
        FlakyStore::failing_first(1),
    );

    let keys: Vec<String> = (0..threshold - 1).map(|i| format!("198.51.100.{i}")).collect();
    for key in &keys {
        harness.writer.enqueue(item(key));
    }

    assert!(
        harness.wait_for_persisted(threshold - 1, Duration::from_secs(3)).await,
        "items from the crashed drain must be persisted by a later drain"
    );

    assert_eq!(harness.store.persisted_keys(), keys);
    assert!(harness.store.drain_attempts() >= 2);
    assert_eq!(harness.stats.snapshot().batch_retries, 1);

    harness.stop().await;
}

#[tokio::test]
async fn test_items_enqueued_during_outage_survive_it() {
    let harness = start(
        BatchConfig { flush_threshold: 2, debounce_ms: 30, retry_delay_ms: 20 },
        FlakyStore::failing_first(3),
    );

    for i in 0..6 {
        harness.writer.enqueue(item(&format!("198.51.100.{i}")));
        tokio::time::sleep(Duration::from_millis(15)).await;
    }

    assert!(
        harness.wait_for_persisted(6, Duration::from_secs(3)).await,
        "every item must be persisted once the store recovers"
    );
    assert_eq!(harness.stats.snapshot().batch_retries, 3);

    harness.stop().await;
}

#[tokio::test]
async fn test_threshold_drain_applies_one_bulk_write() {
    let harness = start(
        BatchConfig { flush_threshold: 5, debounce_ms: 60_000, retry_delay_ms: 20 },
        FlakyStore::default(),
    );

    for i in 0..5 {
        harness.writer.enqueue(item(&format!("198.51.100.{i}")));
    }

    assert!(harness.wait_for_persisted(5, Duration::from_secs(2)).await);
    assert_eq!(harness.store.drain_attempts(), 1, "a full batch should be one bulk upsert");
    assert_eq!(harness.stats.snapshot().batch_items_written, 5);

    harness.stop().await;
}

#[tokio::test]
async fn test_shutdown_flushes_below_threshold_queue() {
    let harness = start(
        BatchConfig { flush_threshold: 100, debounce_ms: 60_000, retry_delay_ms: 20 },
        FlakyStore::default(),
    );

    harness.writer.enqueue(item("203.0.113.5"));
    harness.writer.enqueue(item("203.0.113.6"));

    let store = Arc::clone(&harness.store);
    harness.stop().await;

    assert_eq!(store.persisted_keys(), vec!["203.0.113.5", "203.0.113.6"]);
}
