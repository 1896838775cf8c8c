//! In-process caching tier.
//!
//! The memory cache is the fastest of the three lookup tiers and the only
//! synchronous one: access never suspends, so the resolver can consult it
//! before paying for any I/O.
//!
//! # Eviction
//!
//! Two mechanisms bound the cache independently:
//!
//! - **Capacity**: true LRU — a `get` refreshes recency, and an insert at
//!   capacity evicts the least-recently-used entry.
//! - **TTL**: checked lazily on read (an expired entry is a miss and is
//!   removed), and proactively by [`MemoryCache::sweep_expired`], which the
//!   resolver runs from a fixed-interval background task so memory stays
//!   bounded even under low read traffic.
//!
//! # Consistency
//!
//! All entries live behind a single short-held `parking_lot::Mutex`; no lock
//! is held across an await point. Hit/miss/eviction counters use relaxed
//! atomics and never affect cache behavior.

pub mod memory;

pub use memory::{MemoryCache, MemoryCacheConfig, MemoryCacheError};
