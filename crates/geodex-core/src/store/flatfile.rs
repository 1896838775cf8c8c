use super::{RecordStore, StoreError};
use crate::types::{BatchItem, GeoRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::{debug, info, warn};

/// One persisted row in the flat store. The file is an append log: the last
/// line for a key wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileRow {
    key: Arc<str>,
    attributes: BTreeMap<String, String>,
    last_updated: i64,
    expires_at: i64,
    access_count: u64,
    last_accessed: Option<i64>,
}

struct FileState {
    index: HashMap<Arc<str>, FileRow>,
}

/// Degrade-to-file record store: a JSON-lines append log with an in-memory
/// index, used while the primary store is unreachable.
///
/// The file and its parent directory are created on open. A missing, empty,
/// or corrupted file is treated as empty — unparseable lines are skipped and
/// disappear on the next rewrite (`clear_expired` / `clear_all`).
pub struct FlatFileStore {
    path: PathBuf,
    ttl: std::time::Duration,
    state: Mutex<FileState>,
}

impl FlatFileStore {
    /// Opens (or initializes) the flat store at `path`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` only if the directory or file cannot be
    /// created; unreadable content is tolerated, not fatal.
    pub async fn open(path: impl AsRef<Path>, ttl: std::time::Duration) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let index = match fs::read_to_string(&path).await {
            Ok(contents) => Self::parse_log(&path, &contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::File::create(&path).await?;
                HashMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), entries = index.len(), "opened fallback flat store");
        Ok(Self { path, ttl, state: Mutex::new(FileState { index }) })
    }

    fn parse_log(path: &Path, contents: &str) -> HashMap<Arc<str>, FileRow> {
        let mut index = HashMap::new();
        let mut skipped = 0usize;

        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<FileRow>(line) {
                Ok(row) => {
                    index.insert(Arc::clone(&row.key), row);
                }
                Err(_) => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!(
                path = %path.display(),
                skipped,
                "skipped unreadable lines in fallback store; treating them as absent"
            );
        }

        index
    }

    async fn append_rows(&self, rows: &[FileRow]) -> Result<(), StoreError> {
        let mut buffer = String::new();
        for row in rows {
            let line = serde_json::to_string(row)
                .map_err(|e| StoreError::Corrupt(format!("row for '{}': {e}", row.key)))?;
            buffer.push_str(&line);
            buffer.push('\n');
        }

        let mut file =
            OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(buffer.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Rewrites the whole file from the index, dropping any corrupt tail.
    async fn rewrite(&self, index: &HashMap<Arc<str>, FileRow>) -> Result<(), StoreError> {
        let mut buffer = String::new();
        for row in index.values() {
            let line = serde_json::to_string(row)
                .map_err(|e| StoreError::Corrupt(format!("row for '{}': {e}", row.key)))?;
            buffer.push_str(&line);
            buffer.push('\n');
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, buffer).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FlatFileStore {
    async fn get(&self, key: &str) -> Result<Option<GeoRecord>, StoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now().timestamp();

        let Some(row) = state.index.get_mut(key) else {
            return Ok(None);
        };
        if row.expires_at <= now {
            return Ok(None);
        }

        row.access_count += 1;
        row.last_accessed = Some(now);

        let resolved_at = DateTime::<Utc>::from_timestamp(row.last_updated, 0)
            .unwrap_or_else(Utc::now);
        Ok(Some(GeoRecord::from_stored(key, row.attributes.clone(), resolved_at)))
    }

    async fn upsert_batch(&self, items: &[BatchItem]) -> Result<u64, StoreError> {
        if items.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.lock().await;
        let mut appended = Vec::with_capacity(items.len());

        for item in items {
            let last_updated = item.timestamp.timestamp();
            let access_count =
                state.index.get(item.key.as_ref()).map_or(0, |row| row.access_count) + 1;

            let row = FileRow {
                key: Arc::clone(&item.key),
                attributes: item.attributes.clone(),
                last_updated,
                expires_at: last_updated + self.ttl.as_secs() as i64,
                access_count,
                last_accessed: Some(last_updated),
            };
            state.index.insert(Arc::clone(&row.key), row.clone());
            appended.push(row);
        }

        self.append_rows(&appended).await?;

        debug!(count = items.len(), "appended batch to fallback store");
        Ok(items.len() as u64)
    }

    async fn clear_expired(&self) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now().timestamp();

        let before = state.index.len();
        state.index.retain(|_, row| row.expires_at > now);
        let removed = (before - state.index.len()) as u64;

        self.rewrite(&state.index).await?;
        if removed > 0 {
            info!(removed, "garbage-collected expired fallback store rows");
        }
        Ok(removed)
    }

    async fn clear_all(&self) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let removed = state.index.len() as u64;

        state.index.clear();
        self.rewrite(&state.index).await?;

        warn!(removed, "cleared all fallback store rows");
        Ok(removed)
    }

    async fn len(&self) -> Result<u64, StoreError> {
        Ok(self.state.lock().await.index.len() as u64)
    }
}
