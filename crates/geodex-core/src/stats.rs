//! Operational statistics.
//!
//! Dual-path design: every event increments relaxed atomics for the internal
//! snapshot and is mirrored through the `metrics` facade so a binary may
//! install any recorder (or none — the facade is a no-op then). Recording is
//! fire-and-forget and must never affect resolution correctness; the only
//! lock is the short-held latency window mutex.

use metrics::{counter, histogram};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
};

/// Number of latency samples kept for averaging.
const LATENCY_WINDOW: usize = 256;

/// How a lookup terminated. Every terminal state of the per-lookup state
/// machine maps to exactly one outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    /// Served from the in-process cache.
    MemoryHit,
    /// Served from the persistent tier (primary or fallback).
    StoreHit,
    /// Resolved by an external provider.
    ProviderResolved,
    /// Key classified as non-public; answered with the private sentinel.
    Rejected,
    /// Key failed structural validation; answered with the invalid sentinel.
    Invalid,
    /// Chain exhausted across all retries; answered with the unknown sentinel.
    Unknown,
}

impl LookupOutcome {
    /// Static label for metrics and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MemoryHit => "memory_hit",
            Self::StoreHit => "store_hit",
            Self::ProviderResolved => "provider",
            Self::Rejected => "rejected",
            Self::Invalid => "invalid",
            Self::Unknown => "unknown",
        }
    }
}

/// Point-in-time view of the collector, safe to serialize for operators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolverStats {
    pub total_lookups: u64,
    pub memory_hits: u64,
    pub store_hits: u64,
    pub provider_resolutions: u64,
    pub rejected_keys: u64,
    pub invalid_keys: u64,
    pub unknown_results: u64,
    pub provider_errors: u64,
    pub batch_flushes: u64,
    pub batch_items_written: u64,
    pub batch_retries: u64,
    /// Average lookup latency over the rolling sample window, milliseconds.
    pub avg_lookup_latency_ms: f64,
}

/// Additive counters plus a bounded rolling latency window.
#[derive(Default)]
pub struct StatsCollector {
    memory_hits: AtomicU64,
    store_hits: AtomicU64,
    provider_resolutions: AtomicU64,
    rejected_keys: AtomicU64,
    invalid_keys: AtomicU64,
    unknown_results: AtomicU64,
    provider_errors: AtomicU64,
    batch_flushes: AtomicU64,
    batch_items_written: AtomicU64,
    batch_retries: AtomicU64,
    latency_window: Mutex<VecDeque<u64>>,
}

impl StatsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a finished lookup with its terminal outcome and latency.
    pub fn record_lookup(&self, outcome: LookupOutcome, latency_ms: u64) {
        let slot = match outcome {
            LookupOutcome::MemoryHit => &self.memory_hits,
            LookupOutcome::StoreHit => &self.store_hits,
            LookupOutcome::ProviderResolved => &self.provider_resolutions,
            LookupOutcome::Rejected => &self.rejected_keys,
            LookupOutcome::Invalid => &self.invalid_keys,
            LookupOutcome::Unknown => &self.unknown_results,
        };
        slot.fetch_add(1, Ordering::Relaxed);

        {
            let mut window = self.latency_window.lock();
            if window.len() == LATENCY_WINDOW {
                window.pop_front();
            }
            window.push_back(latency_ms);
        }

        counter!("geodex_lookups_total", "outcome" => outcome.as_str()).increment(1);
        #[allow(clippy::cast_precision_loss)]
        histogram!("geodex_lookup_latency_ms").record(latency_ms as f64);
    }

    /// Records one failed provider attempt (not a failed lookup).
    pub fn record_provider_error(&self, provider: &str) {
        self.provider_errors.fetch_add(1, Ordering::Relaxed);
        counter!("geodex_provider_errors_total", "provider" => provider.to_string()).increment(1);
    }

    /// Records a successful batch drain of `items` rows.
    pub fn record_batch_flush(&self, items: u64) {
        self.batch_flushes.fetch_add(1, Ordering::Relaxed);
        self.batch_items_written.fetch_add(items, Ordering::Relaxed);
        counter!("geodex_batch_flushes_total").increment(1);
        counter!("geodex_batch_items_written_total").increment(items);
    }

    /// Records a failed drain whose items were requeued.
    pub fn record_batch_retry(&self) {
        self.batch_retries.fetch_add(1, Ordering::Relaxed);
        counter!("geodex_batch_retries_total").increment(1);
    }

    /// Returns a consistent-enough snapshot (counters are read individually;
    /// exactness across fields is not needed for operational visibility).
    #[must_use]
    pub fn snapshot(&self) -> ResolverStats {
        let memory_hits = self.memory_hits.load(Ordering::Relaxed);
        let store_hits = self.store_hits.load(Ordering::Relaxed);
        let provider_resolutions = self.provider_resolutions.load(Ordering::Relaxed);
        let rejected_keys = self.rejected_keys.load(Ordering::Relaxed);
        let invalid_keys = self.invalid_keys.load(Ordering::Relaxed);
        let unknown_results = self.unknown_results.load(Ordering::Relaxed);

        let avg_lookup_latency_ms = {
            let window = self.latency_window.lock();
            if window.is_empty() {
                0.0
            } else {
                #[allow(clippy::cast_precision_loss)]
                let avg = window.iter().sum::<u64>() as f64 / window.len() as f64;
                avg
            }
        };

        ResolverStats {
            total_lookups: memory_hits +
                store_hits +
                provider_resolutions +
                rejected_keys +
                invalid_keys +
                unknown_results,
            memory_hits,
            store_hits,
            provider_resolutions,
            rejected_keys,
            invalid_keys,
            unknown_results,
            provider_errors: self.provider_errors.load(Ordering::Relaxed),
            batch_flushes: self.batch_flushes.load(Ordering::Relaxed),
            batch_items_written: self.batch_items_written.load(Ordering::Relaxed),
            batch_retries: self.batch_retries.load(Ordering::Relaxed),
            avg_lookup_latency_ms,
        }
    }
}
