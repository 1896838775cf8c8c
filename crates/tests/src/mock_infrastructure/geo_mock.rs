//! Geolocation provider mock builder.
//!
//! Wraps mockito to provide shape-specific response builders for the three
//! built-in provider response formats, plus helpers that turn a mock server
//! into a configured [`ProviderEntry`].

use geodex_core::provider::{ProviderEntry, ProviderKind};
use mockito::{Mock, Server, ServerGuard};
use serde_json::json;

/// Builder for mocked geolocation provider endpoints.
///
/// One builder wraps one mockito server; a test usually creates one builder
/// per provider in the chain so each provider has its own endpoint.
pub struct GeoMockBuilder {
    server: ServerGuard,
    mocks: Vec<Mock>,
}

impl GeoMockBuilder {
    /// Creates a builder with a fresh mockito server.
    pub async fn new() -> Self {
        Self { server: Server::new_async().await, mocks: Vec::new() }
    }

    /// Returns a provider entry pointing at this mock server.
    #[must_use]
    pub fn provider_entry(&self, name: &str, kind: ProviderKind) -> ProviderEntry {
        ProviderEntry {
            name: name.to_string(),
            kind,
            url: format!("{}/{{ip}}", self.server.url()),
            timeout_seconds: 2,
        }
    }

    /// Mocks a successful `ip-api.com`-shaped response for `ip`.
    pub async fn mock_ip_api_success(&mut self, ip: &str, country: &str) -> &mut Self {
        let mock = self
            .server
            .mock("GET", format!("/{ip}").as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "status": "success",
                    "country": country,
                    "regionName": "West",
                    "city": "Testville",
                    "isp": "TestNet"
                })
                .to_string(),
            )
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    /// Mocks an `ip-api.com`-shaped failure payload (HTTP 200, status=fail).
    pub async fn mock_ip_api_failure(&mut self, ip: &str) -> &mut Self {
        let mock = self
            .server
            .mock("GET", format!("/{ip}").as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"status": "fail", "message": "quota exceeded"}).to_string())
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    /// Mocks a successful `ipwho.is`-shaped response for `ip`.
    pub async fn mock_ipwho_success(&mut self, ip: &str, country: &str) -> &mut Self {
        let mock = self
            .server
            .mock("GET", format!("/{ip}").as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "success": true,
                    "country": country,
                    "region": "West",
                    "city": "Testville",
                    "connection": {"isp": "TestNet"}
                })
                .to_string(),
            )
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    /// Mocks an `ipwho.is`-shaped failure payload (HTTP 200, success=false).
    pub async fn mock_ipwho_failure(&mut self, ip: &str) -> &mut Self {
        let mock = self
            .server
            .mock("GET", format!("/{ip}").as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"success": false, "message": "reserved range"}).to_string())
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    /// Mocks a successful `geojs.io`-shaped response for `ip`.
    pub async fn mock_geojs_success(&mut self, ip: &str, country: &str) -> &mut Self {
        let mock = self
            .server
            .mock("GET", format!("/{ip}").as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "country": country,
                    "region": "West",
                    "city": "Testville",
                    "organization_name": "TestNet"
                })
                .to_string(),
            )
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    /// Mocks an HTTP-level error for `ip`.
    pub async fn mock_http_error(&mut self, ip: &str, status: usize) -> &mut Self {
        let mock = self
            .server
            .mock("GET", format!("/{ip}").as_str())
            .with_status(status)
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    /// Like `mock_ip_api_success`, but asserting an exact number of hits.
    pub async fn mock_ip_api_success_expect(
        &mut self,
        ip: &str,
        country: &str,
        hits: usize,
    ) -> &mut Self {
        let mock = self
            .server
            .mock("GET", format!("/{ip}").as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"status": "success", "country": country}).to_string())
            .expect(hits)
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    /// Asserts every registered mock's expectations.
    pub async fn assert_all(&self) {
        for mock in &self.mocks {
            mock.assert_async().await;
        }
    }
}
