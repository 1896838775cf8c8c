use super::{RecordStore, StoreError};
use crate::types::{BatchItem, GeoRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{str::FromStr, time::Duration};
use tracing::{debug, info, warn};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS geo_records (
    key           TEXT PRIMARY KEY,
    attributes    TEXT NOT NULL,
    last_updated  INTEGER NOT NULL,
    expires_at    INTEGER NOT NULL,
    access_count  INTEGER NOT NULL DEFAULT 0,
    last_accessed INTEGER
)";

/// Durable record store backed by `SQLite`.
///
/// Rows carry their own expiry (`expires_at`, unix seconds), stamped at write
/// time from the configured TTL. Reads filter on it, so an expired row is
/// indistinguishable from an absent one until `clear_expired` removes it.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    ttl: Duration,
}

impl SqliteStore {
    /// Connects to the database (creating the file and schema if missing).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the database cannot be opened and
    /// `StoreError::Database` if schema creation fails.
    pub async fn connect(database_url: &str, ttl: Duration) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::Database(format!("invalid database URL: {e}")))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(classify_sqlx)?;

        sqlx::query(SCHEMA).execute(&pool).await.map_err(classify_sqlx)?;

        info!(url = database_url, "connected to persistent record store");
        Ok(Self { pool, ttl })
    }

    /// Extracts a non-nullable column, mapping decode failures to `Corrupt`.
    fn get_required<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, StoreError>
    where
        T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
    {
        row.try_get::<T, _>(column)
            .map_err(|e| StoreError::Corrupt(format!("column '{column}': {e}")))
    }

    fn row_to_record(key: &str, row: &SqliteRow) -> Result<GeoRecord, StoreError> {
        let attributes_json: String = Self::get_required(row, "attributes")?;
        let last_updated: i64 = Self::get_required(row, "last_updated")?;

        let attributes = serde_json::from_str(&attributes_json)
            .map_err(|e| StoreError::Corrupt(format!("attributes for '{key}': {e}")))?;
        let resolved_at = DateTime::<Utc>::from_timestamp(last_updated, 0)
            .ok_or_else(|| StoreError::Corrupt(format!("timestamp for '{key}': {last_updated}")))?;

        Ok(GeoRecord::from_stored(key, attributes, resolved_at))
    }
}

/// Maps connection-level sqlx failures to `Unavailable` (the degrade
/// trigger) and everything else to `Database`.
fn classify_sqlx(error: sqlx::Error) -> StoreError {
    match &error {
        sqlx::Error::Io(_) |
        sqlx::Error::PoolTimedOut |
        sqlx::Error::PoolClosed |
        sqlx::Error::Tls(_) |
        sqlx::Error::Configuration(_) => StoreError::Unavailable(error.to_string()),
        _ => StoreError::Database(error.to_string()),
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<GeoRecord>, StoreError> {
        let now = Utc::now().timestamp();

        let row = sqlx::query(
            "SELECT attributes, last_updated FROM geo_records WHERE key = ?1 AND expires_at > ?2",
        )
        .bind(key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let record = Self::row_to_record(key, &row)?;

        // Access bookkeeping is best-effort: a failed touch must not turn a
        // successful read into a miss.
        if let Err(e) = sqlx::query(
            "UPDATE geo_records SET access_count = access_count + 1, last_accessed = ?1 \
             WHERE key = ?2",
        )
        .bind(now)
        .bind(key)
        .execute(&self.pool)
        .await
        {
            debug!(key, error = %e, "failed to record store access");
        }

        Ok(Some(record))
    }

    async fn upsert_batch(&self, items: &[BatchItem]) -> Result<u64, StoreError> {
        if items.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(classify_sqlx)?;

        for item in items {
            let attributes = serde_json::to_string(&item.attributes)
                .map_err(|e| StoreError::Corrupt(format!("attributes for '{}': {e}", item.key)))?;
            let last_updated = item.timestamp.timestamp();
            let expires_at = last_updated + self.ttl.as_secs() as i64;

            sqlx::query(
                "INSERT INTO geo_records \
                     (key, attributes, last_updated, expires_at, access_count, last_accessed) \
                 VALUES (?1, ?2, ?3, ?4, 1, ?3) \
                 ON CONFLICT(key) DO UPDATE SET \
                     attributes = excluded.attributes, \
                     last_updated = excluded.last_updated, \
                     expires_at = excluded.expires_at, \
                     access_count = geo_records.access_count + 1",
            )
            .bind(item.key.as_ref())
            .bind(attributes)
            .bind(last_updated)
            .bind(expires_at)
            .execute(&mut *tx)
            .await
            .map_err(classify_sqlx)?;
        }

        tx.commit().await.map_err(classify_sqlx)?;

        debug!(count = items.len(), "bulk upsert applied");
        Ok(items.len() as u64)
    }

    async fn clear_expired(&self) -> Result<u64, StoreError> {
        let now = Utc::now().timestamp();
        let result = sqlx::query("DELETE FROM geo_records WHERE expires_at <= ?1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(classify_sqlx)?;

        let removed = result.rows_affected();
        if removed > 0 {
            info!(removed, "garbage-collected expired store rows");
        }
        Ok(removed)
    }

    async fn clear_all(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM geo_records")
            .execute(&self.pool)
            .await
            .map_err(classify_sqlx)?;

        warn!(removed = result.rows_affected(), "cleared all store rows");
        Ok(result.rows_affected())
    }

    async fn len(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM geo_records")
            .fetch_one(&self.pool)
            .await
            .map_err(classify_sqlx)?;

        let count: i64 = Self::get_required(&row, "n")?;
        Ok(count.max(0) as u64)
    }
}
