use crate::types::{GasPrices, LogRecord};
use serde::Serialize;

/// One element of the live event stream.
///
/// For a reorg the stream carries `ReorgDetected`, then every `BlockReverted` (oldest first),
/// then the `BlockAdded` events of the new canonical chain in increasing height order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainEvent {
    BlockAdded { height: u64, hash: String, parent_hash: String, timestamp: u64 },
    BlockReverted { height: u64, hash: String },
    /// Informational; the cache has already been invalidated from `common_ancestor + 1`.
    ///
    /// When the fork lies below every retained block, `common_ancestor` is one below the lowest
    /// retained height and `depth` counts only the retained blocks. It is then an upper bound on
    /// the real fork point, which was never observed; blocks at or below it are assumed final.
    ReorgDetected { common_ancestor: u64, depth: u64 },
    GasPriceUpdated(GasPriceTick),
    ContractLog(LogRecord),
}

impl ChainEvent {
    #[must_use]
    pub fn height(&self) -> Option<u64> {
        match self {
            Self::BlockAdded { height, .. } | Self::BlockReverted { height, .. } => Some(*height),
            Self::ContractLog(log) => log.block_number,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GasPriceTick {
    pub prices: GasPrices,
    /// Unix milliseconds.
    pub observed_at_ms: i64,
}
