//! Built-in provider implementations.
//!
//! Each upstream geolocation API has its own response shape and its own idea
//! of what "failure" looks like (several return HTTP 200 with an error
//! payload). One type per shape keeps `validate`/`transform` honest and the
//! chain free of any per-provider knowledge.

use super::{http::HttpClient, Provider, ProviderError};
use crate::types::GeoRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{net::IpAddr, sync::Arc, time::Duration};
use thiserror::Error;

/// Which built-in response shape a configured provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// `ip-api.com` shape: `{"status":"success","country":..,"regionName":..,"city":..,"isp":..}`
    IpApi,
    /// `ipwho.is` shape: `{"success":true,"country":..,"region":..,"city":..,"connection":{"isp":..}}`
    IpWho,
    /// `get.geojs.io` shape: `{"country":..,"region":..,"city":..,"organization_name":..}`
    GeoJs,
}

/// Configuration for one provider in the chain, in chain order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    /// Identifier used in logs and the `provider` record attribute.
    pub name: String,
    /// Response shape this endpoint speaks.
    pub kind: ProviderKind,
    /// Endpoint URL template containing an `{ip}` placeholder.
    pub url: String,
    /// Per-call timeout in seconds (default: 5).
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    5
}

/// Error constructing a provider from configuration.
#[derive(Debug, Error)]
pub enum ProviderConfigError {
    #[error("provider '{0}': url must contain an {{ip}} placeholder")]
    MissingPlaceholder(String),
    #[error("provider '{0}': timeout must be non-zero")]
    ZeroTimeout(String),
}

/// Builds a boxed provider from its configuration entry.
///
/// # Errors
///
/// Returns [`ProviderConfigError`] for a malformed entry; provider
/// configuration problems are startup failures, not runtime ones.
pub fn build_provider(
    entry: &ProviderEntry,
    http: Arc<HttpClient>,
) -> Result<Arc<dyn Provider>, ProviderConfigError> {
    if !entry.url.contains("{ip}") {
        return Err(ProviderConfigError::MissingPlaceholder(entry.name.clone()));
    }
    if entry.timeout_seconds == 0 {
        return Err(ProviderConfigError::ZeroTimeout(entry.name.clone()));
    }

    let base = EndpointBase {
        name: entry.name.clone(),
        url_template: entry.url.clone(),
        timeout: Duration::from_secs(entry.timeout_seconds),
        http,
    };

    Ok(match entry.kind {
        ProviderKind::IpApi => Arc::new(IpApiProvider { base }),
        ProviderKind::IpWho => Arc::new(IpWhoProvider { base }),
        ProviderKind::GeoJs => Arc::new(GeoJsProvider { base }),
    })
}

/// Shared endpoint plumbing for the built-in providers.
struct EndpointBase {
    name: String,
    url_template: String,
    timeout: Duration,
    http: Arc<HttpClient>,
}

impl EndpointBase {
    async fn fetch(&self, ip: IpAddr) -> Result<Value, ProviderError> {
        let url = self.url_template.replace("{ip}", &ip.to_string());
        self.http.get_json(&url, self.timeout).await
    }
}

fn str_field<'a>(raw: &'a Value, field: &str) -> Option<&'a str> {
    raw.get(field).and_then(Value::as_str)
}

/// Provider speaking the `ip-api.com` response shape.
pub struct IpApiProvider {
    base: EndpointBase,
}

#[async_trait]
impl Provider for IpApiProvider {
    fn name(&self) -> &str {
        &self.base.name
    }

    async fn attempt(&self, ip: IpAddr) -> Result<Value, ProviderError> {
        self.base.fetch(ip).await
    }

    fn validate(&self, raw: &Value) -> bool {
        str_field(raw, "status") == Some("success")
    }

    fn transform(&self, raw: &Value, key: &str) -> GeoRecord {
        GeoRecord::resolved(
            key,
            self.name(),
            str_field(raw, "country"),
            str_field(raw, "regionName"),
            str_field(raw, "city"),
            str_field(raw, "isp"),
        )
    }
}

/// Provider speaking the `ipwho.is` response shape.
pub struct IpWhoProvider {
    base: EndpointBase,
}

#[async_trait]
impl Provider for IpWhoProvider {
    fn name(&self) -> &str {
        &self.base.name
    }

    async fn attempt(&self, ip: IpAddr) -> Result<Value, ProviderError> {
        self.base.fetch(ip).await
    }

    fn validate(&self, raw: &Value) -> bool {
        raw.get("success").and_then(Value::as_bool) == Some(true)
    }

    fn transform(&self, raw: &Value, key: &str) -> GeoRecord {
        let operator = raw
            .get("connection")
            .and_then(|connection| connection.get("isp"))
            .and_then(Value::as_str);

        GeoRecord::resolved(
            key,
            self.name(),
            str_field(raw, "country"),
            str_field(raw, "region"),
            str_field(raw, "city"),
            operator,
        )
    }
}

/// Provider speaking the `geojs.io` response shape.
pub struct GeoJsProvider {
    base: EndpointBase,
}

#[async_trait]
impl Provider for GeoJsProvider {
    fn name(&self) -> &str {
        &self.base.name
    }

    async fn attempt(&self, ip: IpAddr) -> Result<Value, ProviderError> {
        self.base.fetch(ip).await
    }

    fn validate(&self, raw: &Value) -> bool {
        // geojs has no explicit success flag; an answer without a country is
        // no answer at all.
        str_field(raw, "country").is_some_and(|country| !country.is_empty())
    }

    fn transform(&self, raw: &Value, key: &str) -> GeoRecord {
        GeoRecord::resolved(
            key,
            self.name(),
            str_field(raw, "country"),
            str_field(raw, "region"),
            str_field(raw, "city"),
            str_field(raw, "organization_name"),
        )
    }
}
