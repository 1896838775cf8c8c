//! External geolocation providers and the failover chain.
//!
//! Providers are unreliable (no SLA) and heterogeneous in response shape, so
//! each one bundles three capabilities behind the [`Provider`] trait:
//!
//! - `attempt`: the network call, returning the raw response as an opaque
//!   JSON blob — the chain never interprets it.
//! - `validate`: the provider-specific "did this actually succeed" rule
//!   (many geo APIs return HTTP 200 with an error payload).
//! - `transform`: normalization of the raw blob into a [`GeoRecord`].
//!
//! [`ProviderChain`] walks its ordered list strictly in order, moving on at
//! any failure, and signals chain exhaustion when every provider has failed —
//! converting that into a sentinel record is the resolver's decision, not the
//! chain's. [`RetryPolicy`] wraps a whole chain traversal with a fixed delay.
//!
//! [`GeoRecord`]: crate::types::GeoRecord
//! [`ProviderChain`]: chain::ProviderChain
//! [`RetryPolicy`]: retry::RetryPolicy

pub mod builtin;
pub mod chain;
pub mod http;
pub mod retry;

use crate::types::GeoRecord;
use async_trait::async_trait;
use serde_json::Value;
use std::{net::IpAddr, time::Duration};
use thiserror::Error;

pub use builtin::{build_provider, ProviderEntry, ProviderKind};
pub use chain::ProviderChain;
pub use http::HttpClient;
pub use retry::RetryPolicy;

/// One provider's failure within a chain traversal, kept for diagnostics.
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    pub provider: String,
    pub reason: String,
}

/// Errors from provider attempts and chain traversal.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// Network-level failure (connect refused, DNS, TLS).
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// The provider did not answer within its configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Non-success HTTP status from the provider.
    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),

    /// The response body could not be parsed as JSON.
    #[error("invalid response body: {0}")]
    InvalidBody(String),

    /// The HTTP transport could not be constructed (startup-time only).
    #[error("client build failed: {0}")]
    ClientBuild(String),

    /// Every provider in the chain failed for one traversal.
    #[error("provider chain exhausted after {} attempts", attempts.len())]
    ChainExhausted { attempts: Vec<AttemptFailure> },
}

/// An external lookup source with its own request shape, validation rule,
/// and normalization function.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Identifier used in logs, stats, and the `provider` record attribute.
    fn name(&self) -> &str;

    /// Performs the network call, returning the raw response blob.
    async fn attempt(&self, ip: IpAddr) -> Result<Value, ProviderError>;

    /// Returns `true` if the raw response represents a usable answer.
    fn validate(&self, raw: &Value) -> bool;

    /// Normalizes a validated raw response into a record for `key`.
    ///
    /// Must not fail: fields the provider did not supply are simply omitted
    /// from the record's attributes.
    fn transform(&self, raw: &Value, key: &str) -> GeoRecord;
}
