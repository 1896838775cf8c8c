//! # Geodex Core
//!
//! Core library for the geodex IP geolocation resolver: a resolved-value
//! caching and fallback-provider engine.
//!
//! This crate provides the foundational components for:
//!
//! - **[`policy`]**: Input validation and classification (public vs. private/
//!   reserved addresses) plus a static CIDR allow-list.
//!
//! - **[`cache`]**: Bounded in-process LRU cache with TTL expiry and a
//!   background sweep, the fastest lookup tier.
//!
//! - **[`store`]**: Durable key→record storage with a `SQLite` backend, a
//!   degrade-to-file fallback, and an asynchronous batch write queue.
//!
//! - **[`provider`]**: Ordered chain of external geolocation providers, each
//!   with its own response shape, validation rule, and transform, plus a
//!   fixed-delay retry policy around the whole chain.
//!
//! - **[`resolver`]**: The orchestrator and sole public entry point,
//!   composing all tiers per lookup. Never returns an error to its caller.
//!
//! - **[`stats`]**: Fire-and-forget operational counters and latency
//!   averaging; never affects resolution correctness.
//!
//! ## Lookup Flow
//!
//! ```text
//! resolve(key)
//!       │
//!       ▼
//! ┌─────────────┐
//! │  Classify   │ ─── Malformed ───► "invalid" sentinel
//! │   (policy)  │ ─── Non-public ──► "private" sentinel
//! └──────┬──────┘
//!        │ Public
//!        ▼
//! ┌─────────────┐
//! │ MemoryCache │ ─── Hit ──► Record
//! └──────┬──────┘
//!        │ Miss
//!        ▼
//! ┌─────────────┐
//! │ TieredStore │ ─── Hit ──► populate MemoryCache ──► Record
//! │ (SQLite or  │
//! │  flat file) │
//! └──────┬──────┘
//!        │ Miss
//!        ▼
//! ┌──────────────────────────────┐
//! │ Semaphore permit             │
//! │   └► RetryPolicy             │
//! │        └► ProviderChain      │ ─── Success ──► populate MemoryCache
//! │             P1 → P2 → P3     │                 enqueue BatchWriter
//! └──────────────┬───────────────┘                 ──► Record
//!                │ Chain exhausted, retries spent
//!                ▼
//!        "unknown" sentinel
//! ```
//!
//! The batch write queue drains to durable storage asynchronously and never
//! adds latency to the request path.

pub mod cache;
pub mod config;
pub mod policy;
pub mod provider;
pub mod resolver;
pub mod stats;
pub mod store;
pub mod types;

pub use resolver::{ResolverBuilder, ResolverService};
pub use types::GeoRecord;
