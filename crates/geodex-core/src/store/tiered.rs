use super::{FlatFileStore, RecordStore, SqliteStore, StoreError};
use crate::types::{BatchItem, GeoRecord};
use async_trait::async_trait;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::warn;

/// Composes the durable backend with the degrade-to-file fallback behind a
/// single [`RecordStore`] interface.
///
/// Selection happens at call time: when a primary is configured and not in
/// its unavailability cool-down, the call goes there first. A connection-
/// level failure marks the primary unavailable for the cool-down window and
/// the call degrades to the fallback; after the window the next call
/// re-probes the primary. Non-connection failures also degrade the current
/// call but do not start a cool-down.
pub struct TieredStore {
    primary: Option<SqliteStore>,
    fallback: FlatFileStore,
    /// Unix millis until which the primary is considered down; 0 = up.
    primary_down_until_ms: AtomicU64,
    cooldown: Duration,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl TieredStore {
    #[must_use]
    pub fn new(primary: Option<SqliteStore>, fallback: FlatFileStore, cooldown: Duration) -> Self {
        Self {
            primary,
            fallback,
            primary_down_until_ms: AtomicU64::new(0),
            cooldown,
        }
    }

    /// Returns `true` when the primary should be tried for this call.
    #[must_use]
    pub fn primary_available(&self) -> bool {
        self.primary.is_some() && now_ms() >= self.primary_down_until_ms.load(Ordering::Relaxed)
    }

    fn mark_primary_down(&self, error: &StoreError) {
        let until = now_ms() + self.cooldown.as_millis() as u64;
        self.primary_down_until_ms.store(until, Ordering::Relaxed);
        warn!(
            error = %error,
            cooldown_secs = self.cooldown.as_secs(),
            "primary store unavailable, degrading to fallback file store"
        );
    }

    fn note_failure(&self, operation: &str, error: &StoreError) {
        if error.is_unavailable() {
            self.mark_primary_down(error);
        } else {
            warn!(operation, error = %error, "primary store operation failed, using fallback");
        }
    }
}

#[async_trait]
impl RecordStore for TieredStore {
    async fn get(&self, key: &str) -> Result<Option<GeoRecord>, StoreError> {
        if self.primary_available() {
            if let Some(primary) = self.primary.as_ref() {
                match primary.get(key).await {
                    Ok(found) => return Ok(found),
                    Err(e) => self.note_failure("get", &e),
                }
            }
        }

        self.fallback.get(key).await
    }

    async fn upsert_batch(&self, items: &[BatchItem]) -> Result<u64, StoreError> {
        if self.primary_available() {
            if let Some(primary) = self.primary.as_ref() {
                match primary.upsert_batch(items).await {
                    Ok(applied) => return Ok(applied),
                    Err(e) => self.note_failure("upsert_batch", &e),
                }
            }
        }

        self.fallback.upsert_batch(items).await
    }

    async fn clear_expired(&self) -> Result<u64, StoreError> {
        let mut removed = 0u64;

        if self.primary_available() {
            if let Some(primary) = self.primary.as_ref() {
                match primary.clear_expired().await {
                    Ok(n) => removed += n,
                    Err(e) => self.note_failure("clear_expired", &e),
                }
            }
        }

        removed += self.fallback.clear_expired().await?;
        Ok(removed)
    }

    async fn clear_all(&self) -> Result<u64, StoreError> {
        let mut removed = 0u64;

        if self.primary_available() {
            if let Some(primary) = self.primary.as_ref() {
                match primary.clear_all().await {
                    Ok(n) => removed += n,
                    Err(e) => self.note_failure("clear_all", &e),
                }
            }
        }

        removed += self.fallback.clear_all().await?;
        Ok(removed)
    }

    async fn len(&self) -> Result<u64, StoreError> {
        if self.primary_available() {
            if let Some(primary) = self.primary.as_ref() {
                match primary.len().await {
                    Ok(n) => return Ok(n),
                    Err(e) => self.note_failure("len", &e),
                }
            }
        }

        self.fallback.len().await
    }
}
