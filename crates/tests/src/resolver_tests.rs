//! End-to-end resolution tests against mocked provider endpoints.
//!
//! These tests wire the real components together: tiered store over a
//! temp-file `SQLite` database, built-in providers pointed at mockito
//! servers, the batch writer, and the resolver orchestration.

use crate::mock_infrastructure::GeoMockBuilder;
use geodex_core::{
    cache::MemoryCacheConfig,
    provider::{build_provider, HttpClient, ProviderKind, RetryPolicy},
    resolver::ResolverBuilder,
    store::{BatchConfig, FlatFileStore, RecordStore, SqliteStore, TieredStore},
    types::{BatchItem, GeoRecord, ATTR_COUNTRY, STATUS_INVALID, STATUS_UNKNOWN},
    ResolverService,
};
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;

async fn tiered_store(dir: &TempDir, ttl: Duration) -> Arc<TieredStore> {
    let url = format!("sqlite://{}/geodex.db", dir.path().display());
    let primary = SqliteStore::connect(&url, ttl).await.expect("test database should open");
    let fallback = FlatFileStore::open(dir.path().join("fallback.jsonl"), ttl)
        .await
        .expect("fallback file should open");
    Arc::new(TieredStore::new(Some(primary), fallback, Duration::from_secs(30)))
}

fn resolver_over(
    store: Arc<TieredStore>,
    entries: Vec<(String, ProviderKind, String)>,
    cache_ttl_seconds: u64,
) -> ResolverService {
    let http = Arc::new(HttpClient::new().expect("http client"));
    let providers = entries
        .into_iter()
        .map(|(name, kind, url)| {
            build_provider(
                &geodex_core::provider::ProviderEntry { name, kind, url, timeout_seconds: 2 },
                Arc::clone(&http),
            )
            .expect("valid provider entry")
        })
        .collect();

    ResolverBuilder::new()
        .memory_config(MemoryCacheConfig {
            max_entries: 100,
            ttl_seconds: cache_ttl_seconds,
            sweep_interval_seconds: 300,
        })
        .store(store)
        .providers(providers)
        .retry_policy(RetryPolicy::new(1, Duration::from_millis(10)))
        .batch_config(BatchConfig { flush_threshold: 1, debounce_ms: 20, retry_delay_ms: 20 })
        .build()
        .expect("valid resolver")
}

fn entry_of(mock: &GeoMockBuilder, name: &str, kind: ProviderKind) -> (String, ProviderKind, String) {
    let entry = mock.provider_entry(name, kind);
    (entry.name, entry.kind, entry.url)
}

#[tokio::test]
async fn test_example_scenario_failing_then_succeeding_provider() {
    // Key 203.0.113.5, P1 fails, P2 returns Testland: the record must carry
    // country=Testland, and a repeat call within TTL must hit the memory
    // cache (zero additional provider calls).
    let mut p1 = GeoMockBuilder::new().await;
    p1.mock_ip_api_failure("203.0.113.5").await;
    let mut p2 = GeoMockBuilder::new().await;
    p2.mock_ip_api_success_expect("203.0.113.5", "Testland", 1).await;

    let dir = TempDir::new().unwrap();
    let store = tiered_store(&dir, Duration::from_secs(3600)).await;
    let resolver = resolver_over(
        store,
        vec![
            entry_of(&p1, "p1", ProviderKind::IpApi),
            entry_of(&p2, "p2", ProviderKind::IpApi),
        ],
        300,
    );

    let first = resolver.resolve("203.0.113.5").await;
    assert_eq!(first.attributes.get(ATTR_COUNTRY).map(String::as_str), Some("Testland"));

    let second = resolver.resolve("203.0.113.5").await;
    assert_eq!(second.attributes, first.attributes);

    let stats = resolver.stats();
    assert_eq!(stats.provider_resolutions, 1);
    assert_eq!(stats.memory_hits, 1);
    p2.assert_all().await;
}

#[tokio::test]
async fn test_resolve_never_errors_for_any_key_shape() {
    let dir = TempDir::new().unwrap();
    let store = tiered_store(&dir, Duration::from_secs(3600)).await;
    // No providers at all: the worst case short of a panic.
    let resolver = resolver_over(store, vec![], 300);

    for key in ["", "junk", "10.0.0.1", "127.0.0.1", "203.0.113.9", "::1", "999.1.1.1"] {
        let record = resolver.resolve(key).await;
        assert!(!record.attributes.is_empty(), "record for {key:?} must be well-formed");
        assert!(record.is_sentinel());
    }
}

#[tokio::test]
async fn test_cache_tier_precedence_store_seed_becomes_memory_hit() {
    let dir = TempDir::new().unwrap();
    let store = tiered_store(&dir, Duration::from_secs(3600)).await;

    // Seed the persistent store directly, bypassing the resolver.
    let seeded = GeoRecord::resolved("198.51.100.7", "seed", Some("Storedland"), None, None, None);
    store.upsert_batch(&[BatchItem::from_record(&seeded)]).await.unwrap();

    let resolver = resolver_over(Arc::clone(&store), vec![], 300);

    let first = resolver.resolve("198.51.100.7").await;
    assert_eq!(first.attributes.get(ATTR_COUNTRY).map(String::as_str), Some("Storedland"));

    let second = resolver.resolve("198.51.100.7").await;
    assert_eq!(second.attributes.get(ATTR_COUNTRY).map(String::as_str), Some("Storedland"));

    let stats = resolver.stats();
    assert_eq!(stats.store_hits, 1, "first lookup must come from the store");
    assert_eq!(stats.memory_hits, 1, "second lookup must come from memory");
}

#[tokio::test]
async fn test_memory_ttl_expiry_falls_back_to_next_tier() {
    let mut p1 = GeoMockBuilder::new().await;
    // Two provider calls expected: one before expiry, one after, because the
    // store row is written with a 1 s TTL as well.
    p1.mock_ip_api_success_expect("203.0.113.7", "Testland", 2).await;

    let dir = TempDir::new().unwrap();
    let store = tiered_store(&dir, Duration::from_secs(1)).await;
    let resolver =
        resolver_over(store, vec![entry_of(&p1, "p1", ProviderKind::IpApi)], 1);
    resolver.start_background_tasks();

    let first = resolver.resolve("203.0.113.7").await;
    assert_eq!(first.attributes.get(ATTR_COUNTRY).map(String::as_str), Some("Testland"));

    // Let both the memory entry and the store row expire.
    tokio::time::sleep(Duration::from_millis(1200)).await;

    let second = resolver.resolve("203.0.113.7").await;
    assert_eq!(second.attributes.get(ATTR_COUNTRY).map(String::as_str), Some("Testland"));

    let stats = resolver.stats();
    assert_eq!(stats.provider_resolutions, 2, "stale entries must not satisfy lookups");

    resolver.shutdown().await;
    p1.assert_all().await;
}

#[tokio::test]
async fn test_provider_resolution_is_persisted_via_batch_writer() {
    let mut p1 = GeoMockBuilder::new().await;
    p1.mock_ipwho_success("203.0.113.8", "Testland").await;

    let dir = TempDir::new().unwrap();
    let store = tiered_store(&dir, Duration::from_secs(3600)).await;
    let resolver = resolver_over(
        Arc::clone(&store),
        vec![entry_of(&p1, "p1", ProviderKind::IpWho)],
        300,
    );
    resolver.start_background_tasks();

    resolver.resolve("203.0.113.8").await;

    // flush_threshold is 1, so the writer should persist promptly.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        if store.get("203.0.113.8").await.unwrap().is_some() {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "batch writer never persisted the record");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let stored = store.get("203.0.113.8").await.unwrap().unwrap();
    assert_eq!(stored.attributes.get(ATTR_COUNTRY).map(String::as_str), Some("Testland"));

    resolver.shutdown().await;
}

#[tokio::test]
async fn test_all_providers_down_yields_unknown_sentinel() {
    let mut p1 = GeoMockBuilder::new().await;
    p1.mock_http_error("203.0.113.9", 503).await;

    let dir = TempDir::new().unwrap();
    let store = tiered_store(&dir, Duration::from_secs(3600)).await;
    let resolver =
        resolver_over(store, vec![entry_of(&p1, "p1", ProviderKind::IpApi)], 300);

    let record = resolver.resolve("203.0.113.9").await;
    assert_eq!(record.status(), STATUS_UNKNOWN);
    assert_eq!(resolver.stats().unknown_results, 1);
}

#[tokio::test]
async fn test_malformed_key_is_classified_not_failed() {
    let dir = TempDir::new().unwrap();
    let store = tiered_store(&dir, Duration::from_secs(3600)).await;
    let resolver = resolver_over(store, vec![], 300);

    let record = resolver.resolve("definitely-not-an-ip").await;
    assert_eq!(record.status(), STATUS_INVALID);

    let stats = resolver.stats();
    assert_eq!(stats.invalid_keys, 1);
    assert_eq!(stats.unknown_results, 0);
}
