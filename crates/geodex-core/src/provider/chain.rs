use super::{AttemptFailure, Provider, ProviderError};
use crate::{stats::StatsCollector, types::GeoRecord};
use arc_swap::ArcSwap;
use std::{net::IpAddr, sync::Arc};
use tracing::{debug, trace};

/// Ordered list of providers with strict in-order failover.
///
/// The list lives behind an `ArcSwap`, so a traversal works on an immutable
/// snapshot while operators add, remove, or reorder providers concurrently.
/// The chain knows nothing about any provider's response shape — that is the
/// point of the `attempt`/`validate`/`transform` split.
pub struct ProviderChain {
    providers: ArcSwap<Vec<Arc<dyn Provider>>>,
    stats: Arc<StatsCollector>,
}

impl ProviderChain {
    #[must_use]
    pub fn new(providers: Vec<Arc<dyn Provider>>, stats: Arc<StatsCollector>) -> Self {
        Self { providers: ArcSwap::from_pointee(providers), stats }
    }

    /// Tries each provider in order and returns the first validated,
    /// transformed record.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::ChainExhausted`] when every provider failed
    /// (network error, timeout, or validation rejection). Converting that
    /// into a sentinel record is the caller's decision.
    pub async fn resolve(&self, key: &str, ip: IpAddr) -> Result<GeoRecord, ProviderError> {
        let providers = self.providers.load_full();
        let mut attempts = Vec::with_capacity(providers.len());

        for provider in providers.iter() {
            trace!(provider = provider.name(), key, "attempting provider");

            match provider.attempt(ip).await {
                Ok(raw) => {
                    if provider.validate(&raw) {
                        debug!(provider = provider.name(), key, "provider resolved key");
                        return Ok(provider.transform(&raw, key));
                    }

                    debug!(provider = provider.name(), key, "provider response failed validation");
                    self.stats.record_provider_error(provider.name());
                    attempts.push(AttemptFailure {
                        provider: provider.name().to_string(),
                        reason: "response failed validation".to_string(),
                    });
                }
                Err(e) => {
                    debug!(provider = provider.name(), key, error = %e, "provider attempt failed");
                    self.stats.record_provider_error(provider.name());
                    attempts.push(AttemptFailure {
                        provider: provider.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Err(ProviderError::ChainExhausted { attempts })
    }

    /// Appends a provider to the end of the chain.
    pub fn add(&self, provider: Arc<dyn Provider>) {
        self.providers.rcu(|current| {
            let mut next = current.as_ref().clone();
            next.push(Arc::clone(&provider));
            next
        });
    }

    /// Removes a provider by name. Returns `true` if one was removed.
    pub fn remove(&self, name: &str) -> bool {
        let mut removed = false;
        self.providers.rcu(|current| {
            let next: Vec<Arc<dyn Provider>> = current
                .iter()
                .filter(|provider| provider.name() != name)
                .map(Arc::clone)
                .collect();
            removed = next.len() != current.len();
            next
        });
        removed
    }

    /// Reorders the chain to the given name order. Names not present in the
    /// chain are ignored; providers not named keep their relative order at
    /// the end. Returns `true` if every current provider was named.
    pub fn set_order(&self, order: &[&str]) -> bool {
        let mut complete = true;
        self.providers.rcu(|current| {
            let mut remaining: Vec<Arc<dyn Provider>> = current.to_vec();
            let mut next = Vec::with_capacity(current.len());

            for name in order {
                if let Some(position) =
                    remaining.iter().position(|provider| provider.name() == *name)
                {
                    next.push(remaining.remove(position));
                }
            }

            complete = remaining.is_empty();
            next.extend(remaining);
            next
        });
        complete
    }

    /// Names of the providers in current chain order.
    #[must_use]
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.load().iter().map(|provider| provider.name().to_string()).collect()
    }

    /// Number of configured providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.load().len()
    }

    /// Returns `true` when no providers are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.load().is_empty()
    }
}
