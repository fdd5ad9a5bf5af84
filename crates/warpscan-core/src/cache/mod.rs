//! Two-tier cache: bounded in-memory LRUs per entity kind, mirrored to an optional SQLite
//! store, with single-flight fetch coalescing and reorg-aware invalidation.

pub mod config;
pub mod manager;
mod memory;
mod persist;
mod single_flight;
pub mod store;
pub mod types;

pub use config::{CacheConfig, KindLimits};
pub use manager::{CacheManager, CacheStats, KindStats};
pub use store::{CacheStore, CacheStoreError, SqliteCacheStore, StoredRecord};
pub use types::{CacheEntry, CacheKey, EntityKind, Fetched, TtlClass};
