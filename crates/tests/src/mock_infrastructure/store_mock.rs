//! Scriptable store doubles.

use async_trait::async_trait;
use geodex_core::{
    store::{RecordStore, StoreError},
    types::{BatchItem, GeoRecord},
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// In-memory store that fails the first N bulk upserts before recovering.
///
/// Used to exercise the batch writer's requeue-on-failure guarantee without
/// needing to crash a real database mid-transaction.
#[derive(Default)]
pub struct FlakyStore {
    rows: Mutex<Vec<BatchItem>>,
    fail_remaining: AtomicUsize,
    drain_attempts: AtomicU64,
}

impl FlakyStore {
    /// A store whose first `times` upserts fail with `Unavailable`.
    #[must_use]
    pub fn failing_first(times: usize) -> Self {
        let store = Self::default();
        store.fail_remaining.store(times, Ordering::SeqCst);
        store
    }

    /// Keys persisted so far, in write order.
    #[must_use]
    pub fn persisted_keys(&self) -> Vec<String> {
        self.rows.lock().iter().map(|item| item.key.to_string()).collect()
    }

    /// Number of bulk upserts attempted (failures included).
    #[must_use]
    pub fn drain_attempts(&self) -> u64 {
        self.drain_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<GeoRecord>, StoreError> {
        let rows = self.rows.lock();
        Ok(rows.iter().rev().find(|item| item.key.as_ref() == key).map(|item| {
            GeoRecord::from_stored(&item.key, item.attributes.clone(), item.timestamp)
        }))
    }

    async fn upsert_batch(&self, items: &[BatchItem]) -> Result<u64, StoreError> {
        self.drain_attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Unavailable("injected drain failure".to_string()));
        }

        self.rows.lock().extend_from_slice(items);
        Ok(items.len() as u64)
    }

    async fn clear_expired(&self) -> Result<u64, StoreError> {
        Ok(0)
    }

    async fn clear_all(&self) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock();
        let count = rows.len() as u64;
        rows.clear();
        Ok(count)
    }

    async fn len(&self) -> Result<u64, StoreError> {
        Ok(self.rows.lock().len() as u64)
    }
}
