//! Key classification and the static allow-list.
//!
//! Classification runs before any lookup tier: non-public and malformed keys
//! are answered with sentinel records and never reach the memory cache, the
//! persistent store, or a provider. Classification is exactly that — a
//! classification, not an error: it never panics and never returns `Err`.

use ipnetwork::IpNetwork;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;

/// Why a syntactically valid address is excluded from resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonPublicKind {
    Loopback,
    Private,
    LinkLocal,
    Multicast,
    Unspecified,
    Broadcast,
}

impl NonPublicKind {
    /// Static label for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loopback => "loopback",
            Self::Private => "private",
            Self::LinkLocal => "link_local",
            Self::Multicast => "multicast",
            Self::Unspecified => "unspecified",
            Self::Broadcast => "broadcast",
        }
    }
}

/// Result of classifying a lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    /// A public address, eligible for resolution.
    Public(IpAddr),
    /// A syntactically valid address in an excluded range.
    NonPublic(NonPublicKind),
    /// Not a plausible address at all.
    Malformed,
}

/// Classifies a lookup key without performing any I/O.
///
/// Documentation/TEST-NET blocks (e.g. `203.0.113.0/24`) intentionally count
/// as public so test fixtures exercise the full resolution path.
#[must_use]
pub fn classify_key(key: &str) -> KeyClass {
    let Ok(ip) = key.trim().parse::<IpAddr>() else {
        return KeyClass::Malformed;
    };

    let excluded = match ip {
        IpAddr::V4(v4) => classify_v4(v4),
        IpAddr::V6(v6) => classify_v6(v6),
    };

    match excluded {
        Some(kind) => KeyClass::NonPublic(kind),
        None => KeyClass::Public(ip),
    }
}

fn classify_v4(ip: Ipv4Addr) -> Option<NonPublicKind> {
    if ip.is_unspecified() {
        Some(NonPublicKind::Unspecified)
    } else if ip.is_loopback() {
        Some(NonPublicKind::Loopback)
    } else if ip.is_private() {
        Some(NonPublicKind::Private)
    } else if ip.is_link_local() {
        Some(NonPublicKind::LinkLocal)
    } else if ip.is_multicast() {
        Some(NonPublicKind::Multicast)
    } else if ip.is_broadcast() {
        Some(NonPublicKind::Broadcast)
    } else {
        None
    }
}

fn classify_v6(ip: Ipv6Addr) -> Option<NonPublicKind> {
    let segments = ip.segments();

    if ip.is_unspecified() {
        Some(NonPublicKind::Unspecified)
    } else if ip.is_loopback() {
        Some(NonPublicKind::Loopback)
    } else if segments[0] & 0xfe00 == 0xfc00 {
        // fc00::/7 unique-local
        Some(NonPublicKind::Private)
    } else if segments[0] & 0xffc0 == 0xfe80 {
        // fe80::/10 link-local
        Some(NonPublicKind::LinkLocal)
    } else if ip.is_multicast() {
        Some(NonPublicKind::Multicast)
    } else if let Some(v4) = ip.to_ipv4_mapped() {
        classify_v4(v4)
    } else {
        None
    }
}

/// Error building an [`AllowList`] from configuration.
#[derive(Debug, Error)]
pub enum AllowListError {
    #[error("invalid CIDR block '{block}': {source}")]
    InvalidCidr {
        block: String,
        source: ipnetwork::IpNetworkError,
    },
}

/// Static CIDR allow-list consulted by `is_allowed`, independent of
/// resolution and performing no I/O.
///
/// An empty list allows every well-formed address.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    networks: Vec<IpNetwork>,
}

impl AllowList {
    /// Parses an allow-list from CIDR strings (e.g. `"198.51.100.0/24"`).
    ///
    /// # Errors
    ///
    /// Returns [`AllowListError::InvalidCidr`] on the first block that fails
    /// to parse; allow-list typos are configuration errors, not data.
    pub fn from_blocks<S: AsRef<str>>(blocks: &[S]) -> Result<Self, AllowListError> {
        let networks = blocks
            .iter()
            .map(|block| {
                block.as_ref().parse::<IpNetwork>().map_err(|source| {
                    AllowListError::InvalidCidr { block: block.as_ref().to_string(), source }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { networks })
    }

    /// Checks a key against the allow-list. Malformed keys are never allowed.
    #[must_use]
    pub fn is_allowed(&self, key: &str) -> bool {
        let Ok(ip) = key.trim().parse::<IpAddr>() else {
            return false;
        };

        self.networks.is_empty() || self.networks.iter().any(|network| network.contains(ip))
    }

    /// Number of configured blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.networks.len()
    }

    /// Returns `true` when no blocks are configured (allow-everything).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}
