use crate::types::GeoRecord;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, trace};

/// Errors that occur during memory cache initialization.
#[derive(Debug, Error)]
pub enum MemoryCacheError {
    /// Invalid configuration parameter (zero capacity or zero TTL).
    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),
}

/// Configuration for the in-process record cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCacheConfig {
    /// Maximum number of cached records (default: 10,000)
    pub max_entries: usize,
    /// Entry time-to-live in seconds (default: 300)
    pub ttl_seconds: u64,
    /// Interval between background expiry sweeps in seconds (default: 300)
    pub sweep_interval_seconds: u64,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self { max_entries: 10_000, ttl_seconds: 300, sweep_interval_seconds: 300 }
    }
}

struct CacheEntry {
    record: Arc<GeoRecord>,
    inserted_at: Instant,
}

/// Bounded LRU cache with lazy TTL expiry.
///
/// A `get` refreshes recency, so capacity eviction removes the entry that has
/// gone unread the longest. TTL is measured from insertion: refreshing
/// recency does not extend an entry's life, only a new insert does.
pub struct MemoryCache {
    entries: Mutex<LruCache<Arc<str>, CacheEntry>>,
    ttl: Duration,
    sweep_interval: Duration,

    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl MemoryCache {
    /// Creates a new memory cache.
    ///
    /// # Errors
    ///
    /// Returns `MemoryCacheError::InvalidConfig` if `max_entries` or
    /// `ttl_seconds` is zero.
    pub fn new(config: &MemoryCacheConfig) -> Result<Self, MemoryCacheError> {
        let capacity = NonZeroUsize::new(config.max_entries).ok_or_else(|| {
            MemoryCacheError::InvalidConfig("max_entries must be non-zero".to_string())
        })?;

        if config.ttl_seconds == 0 {
            return Err(MemoryCacheError::InvalidConfig(
                "ttl_seconds must be non-zero".to_string(),
            ));
        }

        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl: Duration::from_secs(config.ttl_seconds),
            sweep_interval: Duration::from_secs(config.sweep_interval_seconds),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        })
    }

    /// Looks up a record, refreshing its recency on hit.
    ///
    /// An entry older than the TTL is removed and reported as a miss.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<GeoRecord>> {
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get(key) {
            if entry.inserted_at.elapsed() > self.ttl {
                entries.pop(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(key, "memory cache entry expired");
                return None;
            }

            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(Arc::clone(&entry.record));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Inserts a record, evicting the least-recently-used entry at capacity.
    ///
    /// Re-inserting an existing key replaces its entry (and restarts its
    /// TTL), so a key never has two live entries.
    pub fn insert(&self, record: Arc<GeoRecord>) {
        let key = Arc::clone(&record.key);
        let mut entries = self.entries.lock();

        let evicted = entries.push(key, CacheEntry { record, inserted_at: Instant::now() });

        // push returns the displaced pair: either the LRU victim or the
        // previous entry for this same key (a replacement, not an eviction).
        if let Some((evicted_key, _)) = evicted {
            if !entries.contains(&evicted_key) {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                trace!(key = %evicted_key, "evicted least-recently-used entry");
            }
        }
    }

    /// Removes every TTL-expired entry, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let mut entries = self.entries.lock();

        let expired: Vec<Arc<str>> = entries
            .iter()
            .filter(|(_, entry)| entry.inserted_at.elapsed() > self.ttl)
            .map(|(key, _)| Arc::clone(key))
            .collect();

        for key in &expired {
            entries.pop(key);
        }

        if !expired.is_empty() {
            self.expirations.fetch_add(expired.len() as u64, Ordering::Relaxed);
            debug!(count = expired.len(), "swept expired memory cache entries");
        }

        expired.len()
    }

    /// Removes all entries, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    /// Current number of live entries (including not-yet-swept expired ones).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` when the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Interval at which the background sweep should run.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    #[must_use]
    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn eviction_count(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn expiration_count(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }
}
