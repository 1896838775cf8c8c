//! Core value types shared across the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};

/// Attribute key carrying the record status (always present).
pub const ATTR_STATUS: &str = "status";
/// Attribute key for the resolved country name.
pub const ATTR_COUNTRY: &str = "country";
/// Attribute key for the resolved region/state name.
pub const ATTR_REGION: &str = "region";
/// Attribute key for the resolved city name.
pub const ATTR_CITY: &str = "city";
/// Attribute key for the resolved network operator (ISP/organization).
pub const ATTR_OPERATOR: &str = "operator";
/// Attribute key naming the provider that produced a resolved record.
pub const ATTR_PROVIDER: &str = "provider";

/// Status value for records resolved through a provider or a storage tier.
pub const STATUS_RESOLVED: &str = "resolved";
/// Status value for non-public (private/loopback/reserved) keys.
pub const STATUS_PRIVATE: &str = "private";
/// Status value for keys that are not even a plausible address.
pub const STATUS_INVALID: &str = "invalid";
/// Status value when every provider failed across all retries.
pub const STATUS_UNKNOWN: &str = "unknown";

/// A resolved key→attributes record, the unit of value returned to callers.
///
/// Immutable once created: a new lookup produces a new record, never mutates
/// an old one. Callers always receive a structurally valid record; "I don't
/// know" is an explicit [`STATUS_UNKNOWN`] sentinel, never an error or null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoRecord {
    /// The lookup key (an IP address in textual form).
    pub key: Arc<str>,
    /// Resolved attributes. Always contains [`ATTR_STATUS`]; resolved records
    /// additionally carry the geo attribute keys that were available.
    pub attributes: BTreeMap<String, String>,
    /// When this record was produced.
    pub resolved_at: DateTime<Utc>,
}

impl GeoRecord {
    /// Creates a record with the given status and no other attributes.
    fn sentinel(key: &str, status: &str) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(ATTR_STATUS.to_string(), status.to_string());
        Self { key: Arc::from(key), attributes, resolved_at: Utc::now() }
    }

    /// Sentinel for keys in excluded ranges (private/loopback/reserved).
    #[must_use]
    pub fn private_network(key: &str) -> Self {
        Self::sentinel(key, STATUS_PRIVATE)
    }

    /// Sentinel for keys that fail structural validation.
    #[must_use]
    pub fn invalid(key: &str) -> Self {
        Self::sentinel(key, STATUS_INVALID)
    }

    /// Sentinel for lookups where every provider failed across all retries.
    #[must_use]
    pub fn unknown(key: &str) -> Self {
        Self::sentinel(key, STATUS_UNKNOWN)
    }

    /// Creates a resolved record from per-attribute values.
    ///
    /// `None` or empty values are omitted rather than stored as empty
    /// strings, so the attribute set only carries what the provider knew.
    #[must_use]
    pub fn resolved(
        key: &str,
        provider: &str,
        country: Option<&str>,
        region: Option<&str>,
        city: Option<&str>,
        operator: Option<&str>,
    ) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(ATTR_STATUS.to_string(), STATUS_RESOLVED.to_string());
        attributes.insert(ATTR_PROVIDER.to_string(), provider.to_string());

        for (attr, value) in [
            (ATTR_COUNTRY, country),
            (ATTR_REGION, region),
            (ATTR_CITY, city),
            (ATTR_OPERATOR, operator),
        ] {
            if let Some(value) = value {
                if !value.is_empty() {
                    attributes.insert(attr.to_string(), value.to_string());
                }
            }
        }

        Self { key: Arc::from(key), attributes, resolved_at: Utc::now() }
    }

    /// Reconstructs a record read back from a storage tier.
    #[must_use]
    pub fn from_stored(
        key: &str,
        attributes: BTreeMap<String, String>,
        resolved_at: DateTime<Utc>,
    ) -> Self {
        Self { key: Arc::from(key), attributes, resolved_at }
    }

    /// Returns the record status (one of the `STATUS_*` constants).
    #[must_use]
    pub fn status(&self) -> &str {
        self.attributes.get(ATTR_STATUS).map_or(STATUS_UNKNOWN, String::as_str)
    }

    /// Returns `true` for placeholder records that did not come from a
    /// provider or a storage tier.
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.status() != STATUS_RESOLVED
    }
}

/// A pending durable write, produced on provider success and consumed by a
/// batch drain. Requeued (never dropped) if the drain fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub key: Arc<str>,
    pub attributes: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl BatchItem {
    /// Captures a successful resolution for deferred persistence.
    #[must_use]
    pub fn from_record(record: &GeoRecord) -> Self {
        Self {
            key: Arc::clone(&record.key),
            attributes: record.attributes.clone(),
            timestamp: record.resolved_at,
        }
    }
}
