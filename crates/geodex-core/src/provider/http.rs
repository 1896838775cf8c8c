use super::ProviderError;
use reqwest::{Client, ClientBuilder};
use serde_json::Value;
use std::time::Duration;

/// Shared HTTP transport for all providers.
///
/// One connection pool serves the whole chain; per-call timeouts come from
/// each provider's configuration. Redirects are refused — a geolocation API
/// that redirects is answering the wrong question.
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Builds the underlying reqwest client.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::ClientBuild`] if the client cannot be
    /// constructed; this is a startup-time configuration failure.
    pub fn new() -> Result<Self, ProviderError> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("geodex/", env!("CARGO_PKG_VERSION")))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                ProviderError::ClientBuild(e.to_string())
            })?;

        Ok(Self { client })
    }

    /// Sanitizes network errors to avoid leaking URLs or peer details into
    /// logs and error chains.
    fn sanitize_network_error(error: &reqwest::Error) -> String {
        if error.is_connect() {
            "connection refused or unreachable".to_string()
        } else if error.is_timeout() {
            "connection timed out".to_string()
        } else if error.is_request() {
            "request failed".to_string()
        } else if error.is_body() {
            "response body error".to_string()
        } else if error.is_decode() {
            "response decode error".to_string()
        } else if error.is_redirect() {
            "too many redirects".to_string()
        } else {
            "network error".to_string()
        }
    }

    /// Sends a GET request and parses the response as JSON.
    ///
    /// # Errors
    ///
    /// - [`ProviderError::Timeout`] if the call exceeds `timeout`
    /// - [`ProviderError::RequestFailed`] for network-level failures
    /// - [`ProviderError::HttpStatus`] for non-2xx responses
    /// - [`ProviderError::InvalidBody`] if the body is not JSON
    pub async fn get_json(&self, url: &str, timeout: Duration) -> Result<Value, ProviderError> {
        let response =
            self.client.get(url).timeout(timeout).send().await.map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(timeout)
                } else {
                    ProviderError::RequestFailed(Self::sanitize_network_error(&e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::HttpStatus(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(timeout)
            } else {
                ProviderError::RequestFailed(Self::sanitize_network_error(&e))
            }
        })?;

        serde_json::from_slice(&bytes)
            .map_err(|e| ProviderError::InvalidBody(format!("invalid JSON: {e}")))
    }
}
