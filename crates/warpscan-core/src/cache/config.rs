//! Cache sizing and expiry configuration.

use super::types::EntityKind;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Bounds for one entity kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KindLimits {
    /// LRU capacity of the in-memory tier.
    pub max_entries: usize,
    /// TTL applied to volatile entries of this kind.
    pub ttl_secs: u64,
}

impl KindLimits {
    #[must_use]
    pub const fn new(max_entries: usize, ttl_secs: u64) -> Self {
        Self { max_entries, ttl_secs }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// When false both tiers are bypassed; fetches are still coalesced.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_block_limits")]
    pub block: KindLimits,
    #[serde(default = "default_transaction_limits")]
    pub transaction: KindLimits,
    #[serde(default = "default_address_limits")]
    pub address: KindLimits,
    #[serde(default = "default_contract_limits")]
    pub contract: KindLimits,
    #[serde(default = "default_token_limits")]
    pub token: KindLimits,
    /// TTL of head-adjacent (not yet final) block and transaction data.
    #[serde(default = "default_best_effort_ttl_secs")]
    pub best_effort_ttl_secs: u64,
    /// SQLite file backing the persistent tier. No persistence when unset.
    #[serde(default)]
    pub persistent_path: Option<PathBuf>,
    /// Confirmation depth after which block data is treated as final.
    #[serde(default = "default_reorg_window")]
    pub reorg_window: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_block_limits() -> KindLimits {
    KindLimits::new(1_000, 12)
}

fn default_transaction_limits() -> KindLimits {
    KindLimits::new(1_000, 6)
}

fn default_address_limits() -> KindLimits {
    KindLimits::new(1_000, 15)
}

fn default_contract_limits() -> KindLimits {
    KindLimits::new(500, 86_400)
}

fn default_token_limits() -> KindLimits {
    KindLimits::new(500, 86_400)
}

fn default_best_effort_ttl_secs() -> u64 {
    12
}

fn default_reorg_window() -> u64 {
    64
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            block: default_block_limits(),
            transaction: default_transaction_limits(),
            address: default_address_limits(),
            contract: default_contract_limits(),
            token: default_token_limits(),
            best_effort_ttl_secs: default_best_effort_ttl_secs(),
            persistent_path: None,
            reorg_window: default_reorg_window(),
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn limits(&self, kind: EntityKind) -> KindLimits {
        match kind {
            EntityKind::Block => self.block,
            EntityKind::Transaction => self.transaction,
            EntityKind::Address => self.address,
            EntityKind::Contract => self.contract,
            EntityKind::Token => self.token,
        }
    }

    #[must_use]
    pub fn best_effort_ttl(&self) -> Duration {
        Duration::from_secs(self.best_effort_ttl_secs)
    }
}
