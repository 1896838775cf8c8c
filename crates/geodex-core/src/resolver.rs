//! The resolution orchestrator, and the only public entry point.
//!
//! [`ResolverService::resolve`] composes every other component per lookup:
//!
//! 1. Classify the key; answer sentinels for malformed/non-public keys.
//! 2. Check the memory cache.
//! 3. Check the persistent store; on hit, write through to the memory cache.
//! 4. Acquire a concurrency permit and run the provider chain under the
//!    retry policy.
//! 5. On success, write through to the memory cache and enqueue the batch
//!    write; on total failure, answer the `unknown` sentinel.
//!
//! Nothing below this boundary ever reaches the caller as an error: internal
//! failures become fallback behavior (next tier, next provider, retry) or a
//! sentinel record. Only invalid configuration at startup is fatal.

use crate::{
    cache::{MemoryCache, MemoryCacheConfig, MemoryCacheError},
    config::AppConfig,
    policy::{classify_key, AllowList, KeyClass},
    provider::{
        build_provider, builtin::ProviderConfigError, HttpClient, Provider, ProviderChain,
        RetryPolicy,
    },
    stats::{LookupOutcome, ResolverStats, StatsCollector},
    store::{
        BatchConfig, BatchWriter, FlatFileStore, RecordStore, SqliteStore, StoreError, TieredStore,
    },
    types::{BatchItem, GeoRecord},
};
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    sync::{broadcast, OwnedSemaphorePermit, Semaphore},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// Errors constructing a resolver. These are the only failures the engine
/// treats as fatal: a misconfigured resolver must not start.
#[derive(Debug, thiserror::Error)]
pub enum ResolverInitError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Cache(#[from] MemoryCacheError),

    #[error("failed to initialize fallback store: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderConfigError),

    #[error("failed to build HTTP transport: {0}")]
    Transport(String),
}

/// Per-key single-flight table for optional lookup coalescing.
///
/// The first lookup for a key holds the permit while it resolves; concurrent
/// lookups for the same key wait, then re-check the memory cache. Cleanup is
/// best-effort: the guard removes the table entry on drop, and a lookup that
/// races the removal simply creates a fresh entry and resolves on its own.
struct InflightLookups {
    table: Arc<DashMap<Arc<str>, Arc<Semaphore>, RandomState>>,
}

struct InflightGuard {
    table: Arc<DashMap<Arc<str>, Arc<Semaphore>, RandomState>>,
    key: Arc<str>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl InflightLookups {
    fn new() -> Self {
        Self { table: Arc::new(DashMap::with_hasher(RandomState::new())) }
    }

    async fn join(&self, key: &Arc<str>) -> InflightGuard {
        let semaphore = self
            .table
            .entry(Arc::clone(key))
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone();

        let permit = semaphore.acquire_owned().await.ok();
        InflightGuard { table: Arc::clone(&self.table), key: Arc::clone(key), _permit: permit }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.table.remove(&self.key);
    }
}

/// Builder for [`ResolverService`].
///
/// Dependencies (store, providers) are injected rather than read from
/// process-wide state, so tests can assemble multiple independent resolver
/// instances with doubles for any tier.
pub struct ResolverBuilder {
    memory_config: MemoryCacheConfig,
    store: Option<Arc<dyn RecordStore>>,
    providers: Vec<Arc<dyn Provider>>,
    retry: RetryPolicy,
    max_concurrent_lookups: usize,
    allow_list: AllowList,
    batch_config: BatchConfig,
    coalesce_lookups: bool,
}

impl Default for ResolverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            memory_config: MemoryCacheConfig::default(),
            store: None,
            providers: Vec::new(),
            retry: RetryPolicy::default(),
            max_concurrent_lookups: 50,
            allow_list: AllowList::default(),
            batch_config: BatchConfig::default(),
            coalesce_lookups: false,
        }
    }

    #[must_use]
    pub fn memory_config(mut self, config: MemoryCacheConfig) -> Self {
        self.memory_config = config;
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn providers(mut self, providers: Vec<Arc<dyn Provider>>) -> Self {
        self.providers = providers;
        self
    }

    #[must_use]
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn max_concurrent_lookups(mut self, limit: usize) -> Self {
        self.max_concurrent_lookups = limit;
        self
    }

    #[must_use]
    pub fn allow_list(mut self, allow_list: AllowList) -> Self {
        self.allow_list = allow_list;
        self
    }

    #[must_use]
    pub fn batch_config(mut self, config: BatchConfig) -> Self {
        self.batch_config = config;
        self
    }

    #[must_use]
    pub fn coalesce_lookups(mut self, enabled: bool) -> Self {
        self.coalesce_lookups = enabled;
        self
    }

    /// Assembles the resolver.
    ///
    /// # Errors
    ///
    /// Returns [`ResolverInitError::Config`] when no store is configured and
    /// [`ResolverInitError::Cache`] for invalid cache parameters.
    pub fn build(self) -> Result<ResolverService, ResolverInitError> {
        let store = self
            .store
            .ok_or_else(|| ResolverInitError::Config("no persistent store configured".into()))?;

        if self.max_concurrent_lookups == 0 {
            return Err(ResolverInitError::Config(
                "max_concurrent_lookups must be greater than 0".into(),
            ));
        }

        if self.providers.is_empty() {
            warn!("resolver built without providers; cache misses will resolve to 'unknown'");
        }

        let stats = Arc::new(StatsCollector::new());
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(ResolverService {
            memory: Arc::new(MemoryCache::new(&self.memory_config)?),
            store,
            batch: Arc::new(BatchWriter::new(self.batch_config)),
            chain: Arc::new(ProviderChain::new(self.providers, Arc::clone(&stats))),
            retry: self.retry,
            lookup_permits: Arc::new(Semaphore::new(self.max_concurrent_lookups)),
            allow_list: self.allow_list,
            stats,
            inflight: self.coalesce_lookups.then(InflightLookups::new),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }
}

/// The resolver engine: three lookup tiers, a provider chain under retry and
/// concurrency limiting, and asynchronous batched persistence.
pub struct ResolverService {
    memory: Arc<MemoryCache>,
    store: Arc<dyn RecordStore>,
    batch: Arc<BatchWriter>,
    chain: Arc<ProviderChain>,
    retry: RetryPolicy,
    lookup_permits: Arc<Semaphore>,
    allow_list: AllowList,
    stats: Arc<StatsCollector>,
    inflight: Option<InflightLookups>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ResolverService {
    /// Assembles a resolver from application configuration: `SQLite` primary
    /// store (degrading to the flat file if unreachable at startup), built-in
    /// providers, and all tunables.
    ///
    /// # Errors
    ///
    /// Returns [`ResolverInitError`] for invalid configuration, an
    /// uninitializable fallback store, or an unbuildable HTTP transport. An
    /// unreachable primary store is NOT an error — the resolver starts
    /// degraded on the fallback file.
    pub async fn from_config(config: &AppConfig) -> Result<Self, ResolverInitError> {
        config.validate().map_err(ResolverInitError::Config)?;
        let allow_list = config.allow_list().map_err(ResolverInitError::Config)?;

        let store_ttl = Duration::from_secs(config.store.ttl_seconds);

        let primary = match SqliteStore::connect(&config.store.database_url, store_ttl).await {
            Ok(store) => Some(store),
            Err(e) => {
                warn!(
                    error = %e,
                    url = %config.store.database_url,
                    "primary store unreachable at startup, degrading to fallback file"
                );
                None
            }
        };
        let fallback = FlatFileStore::open(&config.store.fallback_path, store_ttl).await?;
        let store: Arc<dyn RecordStore> = Arc::new(TieredStore::new(
            primary,
            fallback,
            Duration::from_secs(config.store.availability_cooldown_seconds),
        ));

        let http = Arc::new(HttpClient::new().map_err(|e| {
            ResolverInitError::Transport(e.to_string())
        })?);
        let providers = config
            .providers
            .providers
            .iter()
            .map(|entry| build_provider(entry, Arc::clone(&http)))
            .collect::<Result<Vec<_>, _>>()?;

        ResolverBuilder::new()
            .memory_config(config.cache.clone())
            .store(store)
            .providers(providers)
            .retry_policy(RetryPolicy::new(
                config.retry.max_attempts,
                Duration::from_millis(config.retry.delay_ms),
            ))
            .max_concurrent_lookups(config.limiter.max_concurrent_lookups)
            .allow_list(allow_list)
            .batch_config(config.batch.clone())
            .coalesce_lookups(config.policy.coalesce_lookups)
            .build()
    }

    /// Resolves a key to a record. Never returns an error: rejected keys and
    /// total resolution failures are answered with sentinel records.
    pub async fn resolve(&self, key: &str) -> Arc<GeoRecord> {
        let start = Instant::now();

        let ip = match classify_key(key) {
            KeyClass::Malformed => {
                debug!(key, "rejecting malformed key");
                return self.finish(LookupOutcome::Invalid, start, GeoRecord::invalid(key));
            }
            KeyClass::NonPublic(kind) => {
                debug!(key, range = kind.as_str(), "rejecting non-public key");
                return self.finish(LookupOutcome::Rejected, start, GeoRecord::private_network(key));
            }
            KeyClass::Public(ip) => ip,
        };

        if let Some(record) = self.memory.get(key) {
            self.stats.record_lookup(LookupOutcome::MemoryHit, elapsed_ms(start));
            return record;
        }

        // Optional single-flight: wait for an identical in-flight lookup,
        // then re-check the memory cache it may have populated.
        let _inflight_guard = match &self.inflight {
            Some(inflight) => {
                let key_arc: Arc<str> = Arc::from(key);
                let guard = inflight.join(&key_arc).await;
                if let Some(record) = self.memory.get(key) {
                    self.stats.record_lookup(LookupOutcome::MemoryHit, elapsed_ms(start));
                    return record;
                }
                Some(guard)
            }
            None => None,
        };

        match self.store.get(key).await {
            Ok(Some(record)) => {
                let record = Arc::new(record);
                self.memory.insert(Arc::clone(&record));
                self.stats.record_lookup(LookupOutcome::StoreHit, elapsed_ms(start));
                return record;
            }
            Ok(None) => {}
            // A broken store is a cache miss, not an error.
            Err(e) => warn!(key, error = %e, "persistent store lookup failed, continuing"),
        }

        let permit = match Arc::clone(&self.lookup_permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(key, "concurrency limiter closed, answering unknown");
                return self.finish(LookupOutcome::Unknown, start, GeoRecord::unknown(key));
            }
        };

        let result = self.retry.run(|| self.chain.resolve(key, ip)).await;
        drop(permit);

        match result {
            Ok(record) => {
                let record = Arc::new(record);
                self.memory.insert(Arc::clone(&record));
                self.batch.enqueue(BatchItem::from_record(&record));
                self.stats.record_lookup(LookupOutcome::ProviderResolved, elapsed_ms(start));
                record
            }
            Err(e) => {
                warn!(key, error = %e, "resolution failed across all retries");
                self.finish(LookupOutcome::Unknown, start, GeoRecord::unknown(key))
            }
        }
    }

    fn finish(&self, outcome: LookupOutcome, start: Instant, record: GeoRecord) -> Arc<GeoRecord> {
        self.stats.record_lookup(outcome, elapsed_ms(start));
        Arc::new(record)
    }

    /// Static allow-list check; no I/O and independent of resolution.
    #[must_use]
    pub fn is_allowed(&self, key: &str) -> bool {
        self.allow_list.is_allowed(key)
    }

    /// Operational snapshot of counters and latency.
    #[must_use]
    pub fn stats(&self) -> ResolverStats {
        self.stats.snapshot()
    }

    /// Removes every cached and stored record, returning the removed count.
    ///
    /// Maintenance operation, intended for invocation outside the request
    /// path. Store failures are logged and reported as zero removals.
    pub async fn clear_all(&self) -> u64 {
        let from_memory = self.memory.clear() as u64;
        let from_store = match self.store.clear_all().await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "store clear_all failed");
                0
            }
        };
        info!(from_memory, from_store, "cleared all records");
        from_memory + from_store
    }

    /// Removes expired cache entries and garbage-collects expired store rows,
    /// returning the removed count.
    pub async fn clear_expired(&self) -> u64 {
        let from_memory = self.memory.sweep_expired() as u64;
        let from_store = match self.store.clear_expired().await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "store clear_expired failed");
                0
            }
        };
        from_memory + from_store
    }

    /// Spawns the background tasks: the memory-cache sweep and the batch
    /// writer consumer. Idempotent — a second call is a no-op.
    pub fn start_background_tasks(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        let memory = Arc::clone(&self.memory);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(memory.sweep_interval());
            interval.tick().await; // the first tick completes immediately
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => break,
                    _ = interval.tick() => {
                        memory.sweep_expired();
                    }
                }
            }
            debug!("memory sweep task shutting down");
        }));

        tasks.push(tokio::spawn(Arc::clone(&self.batch).run(
            Arc::clone(&self.store),
            Arc::clone(&self.stats),
            self.shutdown_tx.subscribe(),
        )));

        info!("resolver background tasks started");
    }

    /// Signals the background tasks to stop and waits for them; the batch
    /// writer drains its remaining queue before exiting.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock();
            tasks.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
    }

    /// The provider chain, for runtime add/remove/reorder of providers.
    #[must_use]
    pub fn chain(&self) -> &Arc<ProviderChain> {
        &self.chain
    }

    /// Current batch queue depth (pending durable writes).
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.batch.len()
    }

    /// Current memory cache entry count.
    #[must_use]
    pub fn cached_entries(&self) -> usize {
        self.memory.len()
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
}
