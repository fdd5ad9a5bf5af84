//! # Warpscan Core
//!
//! Data-access core of the warpscan terminal ledger explorer.
//!
//! - **[`upstream`]**: endpoint pool with health scoring, suspension and token-bucket rate
//!   limits, plus the request dispatcher (retry, failover, backoff, deadlines).
//!
//! - **[`cache`]**: two-tier cache (bounded LRU memory tier, optional `SQLite` tier) with
//!   single-flight fetches and reorg-aware invalidation.
//!
//! - **[`live`]**: polling loop over chain head and gas price that detects reorganizations and
//!   publishes an ordered event stream to subscribers.
//!
//! - **[`resolver`]**: turns free-form search input into a block, transaction or address.
//!
//! - **[`explorer`]**: typed queries over the dispatcher and cache.
//!
//! - **[`context`]**: builds and owns all of the above from an [`config::AppConfig`].
//!
//! ## Request Flow
//!
//! ```text
//! Explorer query
//!       │
//!       ▼
//! ┌─────────────┐
//! │ Cache Check │ ─── Hit ──► cached value
//! └──────┬──────┘
//!        │ Miss (one fetch per key, others wait)
//!        ▼
//! ┌─────────────┐
//! │ Dispatcher  │ ◄── retry / failover / backoff
//! └──────┬──────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │ EndpointPool│ ─── all suspended ──► EndpointsExhausted
//! └──────┬──────┘
//!        │
//!        ▼
//!    Transport (JSON-RPC or block-explorer REST)
//! ```

pub mod cache;
pub mod chain;
pub mod config;
pub mod context;
pub mod detect;
pub mod error;
pub mod explorer;
pub mod live;
pub mod logging;
pub mod metadata;
pub mod resolver;
pub mod types;
pub mod upstream;
pub mod utils;

pub use context::{ContextError, CoreContext};
pub use error::CoreError;
