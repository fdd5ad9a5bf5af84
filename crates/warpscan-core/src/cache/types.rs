use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, sync::Arc, time::Duration};
use tokio::time::Instant;

/// The closed set of cached entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Block,
    Transaction,
    Address,
    Contract,
    Token,
}

impl EntityKind {
    pub const ALL: [Self; 5] =
        [Self::Block, Self::Transaction, Self::Address, Self::Contract, Self::Token];

    /// Kinds whose entries depend on which block is canonical at their height.
    pub const BLOCK_SCOPED: [Self; 3] = [Self::Block, Self::Transaction, Self::Address];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Transaction => "transaction",
            Self::Address => "address",
            Self::Contract => "contract",
            Self::Token => "token",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    #[must_use]
    pub fn is_block_scoped(self) -> bool {
        Self::BLOCK_SCOPED.contains(&self)
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(kind, identifier)`; identifiers are lowercased so hex case never splits an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    kind: EntityKind,
    id: Arc<str>,
}

impl CacheKey {
    #[must_use]
    pub fn new(kind: EntityKind, id: &str) -> Self {
        Self { kind, id: Arc::from(id.trim().to_ascii_lowercase()) }
    }

    #[must_use]
    pub fn block_number(number: u64) -> Self {
        Self::new(EntityKind::Block, &number.to_string())
    }

    #[must_use]
    pub fn block_hash(hash: &str) -> Self {
        Self::new(EntityKind::Block, hash)
    }

    #[must_use]
    pub fn transaction(hash: &str) -> Self {
        Self::new(EntityKind::Transaction, hash)
    }

    #[must_use]
    pub fn receipt(hash: &str) -> Self {
        Self::new(EntityKind::Transaction, &format!("receipt:{hash}"))
    }

    /// Balance + nonce + code presence snapshot.
    #[must_use]
    pub fn address(address: &str) -> Self {
        Self::new(EntityKind::Address, address)
    }

    /// A single account field (`balance`, `nonce`) cached separately from the full snapshot.
    #[must_use]
    pub fn address_field(field: &str, address: &str) -> Self {
        Self::new(EntityKind::Address, &format!("{field}:{address}"))
    }

    #[must_use]
    pub fn contract(address: &str) -> Self {
        Self::new(EntityKind::Contract, address)
    }

    #[must_use]
    pub fn contract_code(address: &str) -> Self {
        Self::new(EntityKind::Contract, &format!("code:{address}"))
    }

    #[must_use]
    pub fn token(address: &str) -> Self {
        Self::new(EntityKind::Token, address)
    }

    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn id_arc(&self) -> &Arc<str> {
        &self.id
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Expiry policy of a cached entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlClass {
    /// Deeper than the reorg window: never expires, removed only by reorg invalidation.
    Finalized,
    /// Pending transactions, balances, metadata: short per-kind TTL.
    Volatile,
    /// Head-adjacent block data: short TTL or reorg invalidation, whichever first.
    BestEffort,
}

impl TtlClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Finalized => "finalized",
            Self::Volatile => "volatile",
            Self::BestEffort => "best_effort",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "finalized" => Some(Self::Finalized),
            "volatile" => Some(Self::Volatile),
            "best_effort" => Some(Self::BestEffort),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Arc<Value>,
    pub fetched_at: Instant,
    pub ttl_class: TtlClass,
    /// `None` for finalized entries.
    pub ttl: Option<Duration>,
    /// Block height the value is tied to, for reorg invalidation.
    pub height: Option<u64>,
}

impl CacheEntry {
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.saturating_duration_since(self.fetched_at) >= ttl,
            None => false,
        }
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.ttl_class == TtlClass::Finalized
    }
}

/// What a fetch function hands back to the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub value: Value,
    pub height: Option<u64>,
    /// Included in no block yet.
    pub pending: bool,
}

impl Fetched {
    /// Data that belongs to the block at `height`.
    #[must_use]
    pub fn at_height(value: Value, height: u64) -> Self {
        Self { value, height: Some(height), pending: false }
    }

    /// State read at `height` (balances, nonces). Always volatile, but still dropped on reorg.
    #[must_use]
    pub fn snapshot(value: Value, height: Option<u64>) -> Self {
        Self { value, height, pending: false }
    }

    #[must_use]
    pub fn pending(value: Value) -> Self {
        Self { value, height: None, pending: true }
    }

    /// Data with no relation to any block (contract metadata).
    #[must_use]
    pub fn unscoped(value: Value) -> Self {
        Self { value, height: None, pending: false }
    }
}
