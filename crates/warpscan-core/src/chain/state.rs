//! Shared view of the chain tip.
//!
//! The live update loop is the only writer; cache TTL classification and the query facade
//! read it lock-free through `ArcSwap`.

use arc_swap::ArcSwap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::trace;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct ChainTip {
    block_number: u64,
    block_hash: Option<[u8; 32]>,
}

pub struct ChainState {
    tip: ArcSwap<ChainTip>,
    /// Depth after which a block is treated as immutable for caching.
    reorg_window: u64,
    last_tip_update: AtomicU64,
}

impl ChainState {
    #[must_use]
    pub fn new(reorg_window: u64) -> Self {
        Self {
            tip: ArcSwap::from_pointee(ChainTip::default()),
            reorg_window,
            last_tip_update: AtomicU64::new(0),
        }
    }

    /// Best known height; 0 until something has been observed.
    #[inline]
    #[must_use]
    pub fn current_tip(&self) -> u64 {
        self.tip.load().block_number
    }

    #[inline]
    #[must_use]
    pub fn has_tip(&self) -> bool {
        self.current_tip() > 0
    }

    #[inline]
    #[must_use]
    pub fn current_head_hash(&self) -> Option<[u8; 32]> {
        self.tip.load().block_hash
    }

    #[must_use]
    pub fn reorg_window(&self) -> u64 {
        self.reorg_window
    }

    /// True once `height` is at least `reorg_window` blocks below the tip.
    #[must_use]
    pub fn is_finalized(&self, height: u64) -> bool {
        let tip = self.current_tip();
        tip > 0 && height.saturating_add(self.reorg_window) <= tip
    }

    #[must_use]
    pub fn tip_age_seconds(&self) -> Option<u64> {
        match self.last_tip_update.load(Ordering::Acquire) {
            0 => None,
            at => Some(current_unix_timestamp().saturating_sub(at)),
        }
    }

    /// Advances the tip; ignored unless `block_number` is higher than the current one.
    pub fn update_tip(&self, block_number: u64, block_hash: [u8; 32]) -> bool {
        let current = **self.tip.load();
        if block_number <= current.block_number {
            return false;
        }
        self.store(ChainTip { block_number, block_hash: Some(block_hash) });
        trace!(block = block_number, "chain tip updated");
        true
    }

    /// Sets the tip unconditionally. Used after a reorg moves the head sideways or back.
    pub fn force_update_tip(&self, block_number: u64, block_hash: [u8; 32]) {
        self.store(ChainTip { block_number, block_hash: Some(block_hash) });
        trace!(block = block_number, "chain tip force updated");
    }

    /// Records a height seen through a plain `eth_blockNumber` answer, without a hash.
    pub fn observe_height(&self, block_number: u64) -> bool {
        let current = **self.tip.load();
        if block_number <= current.block_number {
            return false;
        }
        self.store(ChainTip { block_number, block_hash: None });
        true
    }

    fn store(&self, tip: ChainTip) {
        self.tip.store(Arc::new(tip));
        self.last_tip_update.store(current_unix_timestamp(), Ordering::Release);
    }
}

fn current_unix_timestamp() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}
