//! Integration tests for warpscan-core.
//!
//! Every test runs the real reqwest transports against mockito servers:
//!
//! - `dispatcher_tests`: failover, rate-limit backoff, error classification, cancellation
//! - `resolver_tests`: universal resolver and typed queries, cache hits
//! - `metadata_tests`: block-explorer REST transport (contract and token metadata)
//! - `persistence_tests`: the `SQLite` cache tier across restarts
//! - `live_tests`: head seeding and the running live update loop
//! - `mock_infrastructure`: reusable mock servers and fixtures
//!
//! ```bash
//! cargo test --package tests
//! ```

#[cfg(test)]
mod dispatcher_tests;

#[cfg(test)]
mod resolver_tests;

#[cfg(test)]
mod metadata_tests;

#[cfg(test)]
mod persistence_tests;

#[cfg(test)]
mod live_tests;

/// Mock infrastructure for testing
pub mod mock_infrastructure;
