//! Application configuration with layered loading.
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: hardcoded in struct `Default` implementations
//! 2. **Config file**: TOML file specified by `GEODEX_CONFIG` env var
//! 3. **Environment variables**: `GEODEX__*` vars override specific fields
//!    (`__` separates nested fields, e.g. `GEODEX__CACHE__TTL_SECONDS=60`)
//!
//! Configuration is validated at load time: zero sizes, an empty provider
//! list, a memory TTL longer than the store TTL, or malformed allow-list
//! CIDRs are errors rather than silent misbehavior.

use crate::{
    cache::MemoryCacheConfig,
    policy::AllowList,
    provider::{ProviderEntry, ProviderKind},
    store::BatchConfig,
};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Persistent store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// `SQLite` database URL for the primary store. Defaults to
    /// `sqlite://./db/geodex.db`.
    pub database_url: String,

    /// Row time-to-live in seconds. Defaults to 7 days.
    pub ttl_seconds: u64,

    /// Path of the degrade-to-file fallback store. Defaults to
    /// `./db/geodex-fallback.jsonl`.
    pub fallback_path: String,

    /// Seconds the primary stays out of rotation after a connection
    /// failure before the next call re-probes it. Defaults to `30`.
    pub availability_cooldown_seconds: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./db/geodex.db".to_string(),
            ttl_seconds: 7 * 24 * 3600,
            fallback_path: "./db/geodex-fallback.jsonl".to_string(),
            availability_cooldown_seconds: 30,
        }
    }
}

/// Outbound concurrency limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterSettings {
    /// Maximum simultaneous provider-chain attempts. Defaults to `50`.
    pub max_concurrent_lookups: usize,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self { max_concurrent_lookups: 50 }
    }
}

/// Retry behavior around the whole provider chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total chain traversals per lookup, including the first. Defaults to `3`.
    pub max_attempts: u32,
    /// Fixed delay between traversals in milliseconds. Defaults to `1000`.
    pub delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_attempts: 3, delay_ms: 1000 }
    }
}

/// Container for the ordered provider list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersSettings {
    /// Providers in chain order. Cannot be empty.
    pub providers: Vec<ProviderEntry>,
}

impl Default for ProvidersSettings {
    fn default() -> Self {
        Self {
            providers: vec![
                ProviderEntry {
                    name: "ip-api".to_string(),
                    kind: ProviderKind::IpApi,
                    url: "http://ip-api.com/json/{ip}".to_string(),
                    timeout_seconds: 5,
                },
                ProviderEntry {
                    name: "ipwho".to_string(),
                    kind: ProviderKind::IpWho,
                    url: "https://ipwho.is/{ip}".to_string(),
                    timeout_seconds: 5,
                },
                ProviderEntry {
                    name: "geojs".to_string(),
                    kind: ProviderKind::GeoJs,
                    url: "https://get.geojs.io/v1/ip/geo/{ip}.json".to_string(),
                    timeout_seconds: 8,
                },
            ],
        }
    }
}

/// Key policy settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySettings {
    /// CIDR blocks consulted by `is_allowed`. Empty means allow everything.
    #[serde(default)]
    pub allow_list: Vec<String>,

    /// De-duplicate concurrent in-flight lookups for the same key. Changes
    /// observable provider-call counts under concurrent load, so it is off
    /// by default.
    #[serde(default)]
    pub coalesce_lookups: bool,
}

/// Application logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g. "trace", "debug", "info", "warn", "error"). Defaults
    /// to `"info"`.
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

/// Root application configuration containing all subsystem settings.
///
/// # Example
///
/// ```toml
/// environment = "production"
///
/// [cache]
/// max_entries = 50000
/// ttl_seconds = 120
///
/// [[providers.providers]]
/// name = "ip-api"
/// kind = "ip-api"
/// url = "http://ip-api.com/json/{ip}"
/// timeout_seconds = 5
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Deployment environment (e.g. "development", "production").
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Memory cache tier configuration.
    #[serde(default)]
    pub cache: MemoryCacheConfig,

    /// Persistent store configuration.
    #[serde(default)]
    pub store: StoreSettings,

    /// Batch write queue configuration.
    #[serde(default)]
    pub batch: BatchConfig,

    /// Outbound concurrency limiting.
    #[serde(default)]
    pub limiter: LimiterSettings,

    /// Whole-chain retry configuration.
    #[serde(default)]
    pub retry: RetrySettings,

    /// Ordered provider list.
    #[serde(default)]
    pub providers: ProvidersSettings,

    /// Allow-list and lookup policy.
    #[serde(default)]
    pub policy: PolicySettings,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_environment() -> String {
    "development".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            cache: MemoryCacheConfig::default(),
            store: StoreSettings::default(),
            batch: BatchConfig::default(),
            limiter: LimiterSettings::default(),
            retry: RetrySettings::default(),
            providers: ProvidersSettings::default(),
            policy: PolicySettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or
    /// deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let defaults_toml = toml_from_defaults(&defaults)?;

        let builder = Config::builder()
            .add_source(File::from_str(&defaults_toml, config::FileFormat::Toml))
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("GEODEX").separator("__"))
            .build()?;

        builder.try_deserialize()
    }

    /// Loads configuration from `config/geodex.toml` (overridable via the
    /// `GEODEX_CONFIG` env var) with fallback to compiled defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("GEODEX_CONFIG").unwrap_or_else(|_| "config/geodex.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Parses the configured allow-list.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string for a malformed CIDR block.
    pub fn allow_list(&self) -> Result<AllowList, String> {
        AllowList::from_blocks(&self.policy.allow_list).map_err(|e| e.to_string())
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache.max_entries == 0 {
            return Err("cache.max_entries must be greater than 0".to_string());
        }
        if self.cache.ttl_seconds == 0 {
            return Err("cache.ttl_seconds must be greater than 0".to_string());
        }
        if self.cache.sweep_interval_seconds == 0 {
            return Err("cache.sweep_interval_seconds must be greater than 0".to_string());
        }
        if self.store.ttl_seconds == 0 {
            return Err("store.ttl_seconds must be greater than 0".to_string());
        }
        if self.cache.ttl_seconds > self.store.ttl_seconds {
            return Err(format!(
                "cache.ttl_seconds ({}) must not exceed store.ttl_seconds ({})",
                self.cache.ttl_seconds, self.store.ttl_seconds
            ));
        }
        if self.batch.flush_threshold == 0 {
            return Err("batch.flush_threshold must be greater than 0".to_string());
        }
        if self.limiter.max_concurrent_lookups == 0 {
            return Err("limiter.max_concurrent_lookups must be greater than 0".to_string());
        }
        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be greater than 0".to_string());
        }

        if self.providers.providers.is_empty() {
            return Err("no providers configured".to_string());
        }
        for provider in &self.providers.providers {
            if provider.name.is_empty() {
                return Err("provider name cannot be empty".to_string());
            }
            if !provider.url.starts_with("http") {
                return Err(format!(
                    "invalid URL for provider {}: {}",
                    provider.name, provider.url
                ));
            }
            if !provider.url.contains("{ip}") {
                return Err(format!(
                    "URL for provider {} is missing the {{ip}} placeholder",
                    provider.name
                ));
            }
            if provider.timeout_seconds == 0 {
                return Err(format!("timeout for provider {} must be non-zero", provider.name));
            }
        }

        self.allow_list()?;

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }
}

/// Serializes compiled defaults so the config crate can layer file and
/// environment sources on top of them without a hand-maintained
/// `set_default` call per field.
fn toml_from_defaults(defaults: &AppConfig) -> Result<String, ConfigError> {
    toml::to_string(defaults).map_err(|e| ConfigError::Message(e.to_string()))
}
