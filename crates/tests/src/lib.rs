//! Integration tests for the geodex resolver engine.
//!
//! This crate contains the cross-component test modules:
//!
//! - `resolver_tests`: End-to-end resolution through all three tiers against
//!   mocked provider endpoints, including the cache-idempotence and
//!   tier-precedence properties.
//! - `failover_tests`: Provider chain ordering, validation-driven failover,
//!   and chain exhaustion behavior.
//! - `batch_tests`: Batch write durability across failed drains.
//! - `mock_infrastructure`: Reusable mock types (provider HTTP endpoints via
//!   mockito, scriptable store doubles).
//!
//! Run with `cargo test --package geodex-tests`. No external services are
//! required; provider endpoints are mocked and stores use temp files.

pub mod mock_infrastructure;

#[cfg(test)]
mod batch_tests;

#[cfg(test)]
mod failover_tests;

#[cfg(test)]
mod resolver_tests;
