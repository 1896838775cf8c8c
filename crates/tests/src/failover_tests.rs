//! Provider chain ordering and failover tests.
//!
//! The chain must try providers strictly in configured order, treat network
//! failures, HTTP errors, and validation rejections identically (move on),
//! and only signal exhaustion when every provider has failed.

use crate::mock_infrastructure::GeoMockBuilder;
use geodex_core::{
    provider::{build_provider, HttpClient, ProviderChain, ProviderEntry, ProviderError, ProviderKind},
    stats::StatsCollector,
    types::{ATTR_COUNTRY, ATTR_PROVIDER},
};
use std::sync::Arc;

async fn chain_from(entries: Vec<ProviderEntry>) -> ProviderChain {
    let http = Arc::new(HttpClient::new().expect("http client"));
    let providers = entries
        .iter()
        .map(|entry| build_provider(entry, Arc::clone(&http)).expect("valid entry"))
        .collect();
    ProviderChain::new(providers, Arc::new(StatsCollector::new()))
}

fn ip() -> std::net::IpAddr {
    "203.0.113.5".parse().unwrap()
}

#[tokio::test]
async fn test_two_rejected_validations_fall_through_to_third_provider() {
    // First two providers answer HTTP 200 but fail their own validation
    // rule; the record must come from the third provider's transform.
    let mut p1 = GeoMockBuilder::new().await;
    p1.mock_ip_api_failure("203.0.113.5").await;
    let mut p2 = GeoMockBuilder::new().await;
    p2.mock_ipwho_failure("203.0.113.5").await;
    let mut p3 = GeoMockBuilder::new().await;
    p3.mock_geojs_success("203.0.113.5", "Thirdland").await;

    let chain = chain_from(vec![
        p1.provider_entry("p1", ProviderKind::IpApi),
        p2.provider_entry("p2", ProviderKind::IpWho),
        p3.provider_entry("p3", ProviderKind::GeoJs),
    ])
    .await;

    let record = chain.resolve("203.0.113.5", ip()).await.expect("third provider should win");

    assert_eq!(record.attributes.get(ATTR_COUNTRY).map(String::as_str), Some("Thirdland"));
    assert_eq!(record.attributes.get(ATTR_PROVIDER).map(String::as_str), Some("p3"));
    p1.assert_all().await;
    p2.assert_all().await;
    p3.assert_all().await;
}

#[tokio::test]
async fn test_http_error_and_timeout_also_move_to_next_provider() {
    let mut p1 = GeoMockBuilder::new().await;
    p1.mock_http_error("203.0.113.5", 500).await;
    let mut p2 = GeoMockBuilder::new().await;
    p2.mock_ip_api_success("203.0.113.5", "Secondland").await;

    let chain = chain_from(vec![
        p1.provider_entry("p1", ProviderKind::IpApi),
        p2.provider_entry("p2", ProviderKind::IpApi),
    ])
    .await;

    let record = chain.resolve("203.0.113.5", ip()).await.unwrap();
    assert_eq!(record.attributes.get(ATTR_COUNTRY).map(String::as_str), Some("Secondland"));
}

#[tokio::test]
async fn test_first_healthy_provider_shields_the_rest() {
    let mut p1 = GeoMockBuilder::new().await;
    p1.mock_ip_api_success_expect("203.0.113.5", "Firstland", 1).await;
    // p2 expects zero hits.
    let mut p2 = GeoMockBuilder::new().await;
    p2.mock_ip_api_success_expect("203.0.113.5", "Secondland", 0).await;

    let chain = chain_from(vec![
        p1.provider_entry("p1", ProviderKind::IpApi),
        p2.provider_entry("p2", ProviderKind::IpApi),
    ])
    .await;

    let record = chain.resolve("203.0.113.5", ip()).await.unwrap();
    assert_eq!(record.attributes.get(ATTR_COUNTRY).map(String::as_str), Some("Firstland"));

    p1.assert_all().await;
    p2.assert_all().await;
}

#[tokio::test]
async fn test_every_provider_failing_signals_chain_exhaustion() {
    let mut p1 = GeoMockBuilder::new().await;
    p1.mock_http_error("203.0.113.5", 503).await;
    let mut p2 = GeoMockBuilder::new().await;
    p2.mock_ip_api_failure("203.0.113.5").await;

    let chain = chain_from(vec![
        p1.provider_entry("p1", ProviderKind::IpApi),
        p2.provider_entry("p2", ProviderKind::IpApi),
    ])
    .await;

    let error = chain.resolve("203.0.113.5", ip()).await.unwrap_err();
    match error {
        ProviderError::ChainExhausted { attempts } => {
            assert_eq!(attempts.len(), 2);
            assert_eq!(attempts[0].provider, "p1");
            assert_eq!(attempts[1].provider, "p2");
        }
        other => panic!("expected chain exhaustion, got {other}"),
    }
}

#[tokio::test]
async fn test_runtime_reorder_changes_which_provider_answers() {
    let mut p1 = GeoMockBuilder::new().await;
    p1.mock_ip_api_success("203.0.113.5", "Firstland").await;
    let mut p2 = GeoMockBuilder::new().await;
    p2.mock_ip_api_success("203.0.113.5", "Secondland").await;

    let chain = chain_from(vec![
        p1.provider_entry("p1", ProviderKind::IpApi),
        p2.provider_entry("p2", ProviderKind::IpApi),
    ])
    .await;

    let before = chain.resolve("203.0.113.5", ip()).await.unwrap();
    assert_eq!(before.attributes.get(ATTR_PROVIDER).map(String::as_str), Some("p1"));

    assert!(chain.set_order(&["p2", "p1"]));

    let after = chain.resolve("203.0.113.5", ip()).await.unwrap();
    assert_eq!(after.attributes.get(ATTR_PROVIDER).map(String::as_str), Some("p2"));
}
