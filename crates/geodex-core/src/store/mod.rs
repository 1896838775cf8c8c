//! Durable key→record storage.
//!
//! The persistent tier sits between the memory cache and the provider chain.
//! Two implementations of the same [`RecordStore`] interface exist:
//!
//! - [`SqliteStore`]: the primary durable backend (sqlx / `SQLite`), with a
//!   per-row TTL — rows past `expires_at` are treated as absent on read even
//!   if physically present, until `clear_expired` garbage-collects them.
//! - [`FlatFileStore`]: a JSON-lines flat store used when the primary is
//!   unreachable. Survives being missing, empty, or corrupted (a corrupted
//!   file is treated as empty and overwritten on the next rewrite).
//!
//! [`TieredStore`] composes the two with a call-time availability check; the
//! resolver only ever sees the composed store. Store failures never cross the
//! resolver boundary: a broken store is a cache miss, not an error.
//!
//! Writes are never applied individually. Successful resolutions are
//! enqueued to the [`BatchWriter`] queue and flushed in bulk by a single
//! consumer task (size threshold or debounce timer); a failed drain requeues
//! its items at the front of the queue.
//!
//! [`SqliteStore`]: sqlite::SqliteStore
//! [`FlatFileStore`]: flatfile::FlatFileStore
//! [`TieredStore`]: tiered::TieredStore
//! [`BatchWriter`]: batch::BatchWriter

pub mod batch;
pub mod flatfile;
pub mod sqlite;
pub mod tiered;

use crate::types::{BatchItem, GeoRecord};
use async_trait::async_trait;
use thiserror::Error;

pub use batch::{BatchConfig, BatchWriter};
pub use flatfile::FlatFileStore;
pub use sqlite::SqliteStore;
pub use tiered::TieredStore;

/// Errors from the persistent tier.
///
/// `Unavailable` is the degrade trigger: the tiered store reacts to it by
/// switching to the fallback file store for a cool-down window. Everything
/// else is logged and absorbed below the resolver boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend cannot be reached (connection refused, pool exhausted).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected an otherwise well-formed operation.
    #[error("database error: {0}")]
    Database(String),

    /// Filesystem error in the flat-file store.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be decoded.
    #[error("corrupt store data: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Returns `true` if the error means the backend itself is unreachable
    /// (as opposed to a bad row or a constraint failure).
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Abstraction over a durable key→record store with TTL-based expiry.
///
/// Implementations must treat rows past their expiry as absent on `get`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetches a live (non-expired) record.
    async fn get(&self, key: &str) -> Result<Option<GeoRecord>, StoreError>;

    /// Applies a batch of resolutions as one bulk upsert. `key` is the
    /// uniqueness constraint; an existing row has its attributes replaced,
    /// its access counter incremented, and its expiry refreshed.
    ///
    /// Returns the number of items applied.
    async fn upsert_batch(&self, items: &[BatchItem]) -> Result<u64, StoreError>;

    /// Deletes expired rows, returning how many were removed.
    async fn clear_expired(&self) -> Result<u64, StoreError>;

    /// Deletes all rows, returning how many were removed.
    async fn clear_all(&self) -> Result<u64, StoreError>;

    /// Number of physically present rows (expired ones included).
    async fn len(&self) -> Result<u64, StoreError>;
}
