//! Polling control loop turning head and gas-price reads into an ordered event stream.
//!
//! # Head tick
//!
//! ```text
//! latest = eth_getBlockByNumber("latest")
//!   same hash as retained tip           -> nothing
//!   lower height, hash we already hold  -> lagging node, nothing
//!   otherwise walk parents (by hash) until one matches the retained window
//!     matched at the tip                -> extension: BlockAdded...
//!     matched below the tip             -> reorg: invalidate_from(ancestor + 1), then
//!                                          ReorgDetected, BlockReverted... (oldest first),
//!                                          BlockAdded... (ascending)
//!     fell off the window               -> deep reorg: same, from the lowest retained block
//! ```
//!
//! A deep reorg reports `lowest retained - 1` as its common ancestor. Nothing below the window
//! is remembered, so the true fork point is unknown and may be lower; those heights are treated
//! as final.
//!
//! A tick that falls far behind catches up at most `max_blocks_per_tick` blocks at a time.

use super::{
    events::{ChainEvent, GasPriceTick},
    subscription::{Registry, Subscription, Topic},
};
use crate::{
    cache::CacheManager,
    chain::{BlockLink, ChainState, HeadWindow},
    error::CoreError,
    explorer::{decode, require_found},
    types::{BlockHeader, GasPrices, LogRecord},
    upstream::{Dispatcher, RpcRequest},
    utils::{format_hash32, format_hex_u64, parse_hash32, parse_hex_u128},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on retained block identities, whatever the reorg window says.
const MAX_RETAINED_BLOCKS: usize = 4_096;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LiveConfig {
    #[serde(default = "default_head_poll_interval_ms")]
    pub head_poll_interval_ms: u64,
    #[serde(default = "default_gas_poll_interval_ms")]
    pub gas_poll_interval_ms: u64,
    /// Per-subscriber queue for block and log events.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long a full subscriber queue may block publishing before it is torn down.
    #[serde(default = "default_block_publish_timeout_ms")]
    pub block_publish_timeout_ms: u64,
    #[serde(default = "default_max_blocks_per_tick")]
    pub max_blocks_per_tick: u64,
    /// How often expired entries are swept from both cache tiers.
    #[serde(default = "default_cache_purge_interval_ms")]
    pub cache_purge_interval_ms: u64,
}

fn default_head_poll_interval_ms() -> u64 {
    2_000
}

fn default_gas_poll_interval_ms() -> u64 {
    1_000
}

fn default_queue_capacity() -> usize {
    256
}

fn default_block_publish_timeout_ms() -> u64 {
    5_000
}

fn default_max_blocks_per_tick() -> u64 {
    32
}

fn default_cache_purge_interval_ms() -> u64 {
    60_000
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            head_poll_interval_ms: default_head_poll_interval_ms(),
            gas_poll_interval_ms: default_gas_poll_interval_ms(),
            queue_capacity: default_queue_capacity(),
            block_publish_timeout_ms: default_block_publish_timeout_ms(),
            max_blocks_per_tick: default_max_blocks_per_tick(),
            cache_purge_interval_ms: default_cache_purge_interval_ms(),
        }
    }
}

impl LiveConfig {
    #[must_use]
    pub fn head_poll_interval(&self) -> Duration {
        Duration::from_millis(self.head_poll_interval_ms)
    }

    #[must_use]
    pub fn gas_poll_interval(&self) -> Duration {
        Duration::from_millis(self.gas_poll_interval_ms)
    }

    #[must_use]
    pub fn cache_purge_interval(&self) -> Duration {
        Duration::from_millis(self.cache_purge_interval_ms)
    }
}

/// What one head tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadUpdate {
    Unchanged,
    /// First observation; the window now holds only the head.
    Seeded { height: u64 },
    Extended { from: u64, to: u64 },
    Reorganized { common_ancestor: u64, reverted: usize, added: usize },
}

pub struct LiveUpdateSubscriber {
    dispatcher: Arc<Dispatcher>,
    cache: Arc<CacheManager>,
    chain: Arc<ChainState>,
    config: LiveConfig,
    registry: Registry,
}

fn link_of(block: &BlockHeader) -> Result<BlockLink, CoreError> {
    let parse = |field: &str, value: &str| {
        parse_hash32(value).ok_or_else(|| CoreError::Decode { what: "block", reason: format!("bad {field} {value}") })
    };
    Ok(BlockLink {
        height: block.number,
        hash: parse("hash", &block.hash)?,
        parent_hash: parse("parentHash", &block.parent_hash)?,
    })
}

fn added_event(block: &BlockHeader) -> ChainEvent {
    ChainEvent::BlockAdded {
        height: block.number,
        hash: block.hash.clone(),
        parent_hash: block.parent_hash.clone(),
        timestamp: block.timestamp,
    }
}

impl LiveUpdateSubscriber {
    #[must_use]
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        cache: Arc<CacheManager>,
        chain: Arc<ChainState>,
        config: LiveConfig,
    ) -> Self {
        let registry =
            Registry::new(config.queue_capacity, Duration::from_millis(config.block_publish_timeout_ms));
        Self { dispatcher, cache, chain, config, registry }
    }

    #[must_use]
    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        self.registry.subscribe(topic)
    }

    /// Empty window sized to the chain's reorg window.
    #[must_use]
    pub fn new_window(&self) -> HeadWindow {
        let capacity = usize::try_from(self.chain.reorg_window()).unwrap_or(MAX_RETAINED_BLOCKS);
        HeadWindow::new(capacity.clamp(1, MAX_RETAINED_BLOCKS))
    }

    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(cancel).await })
    }

    /// Runs until `cancel` fires. A tick already underway completes first; its requests are
    /// not tied to `cancel`.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut window = self.new_window();
        let mut head_tick = tokio::time::interval(self.config.head_poll_interval());
        head_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut gas_tick = tokio::time::interval(self.config.gas_poll_interval());
        gas_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut purge_tick = tokio::time::interval(self.config.cache_purge_interval());
        purge_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        purge_tick.reset();

        info!(
            head_interval_ms = self.config.head_poll_interval_ms,
            gas_interval_ms = self.config.gas_poll_interval_ms,
            "live update loop started"
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = head_tick.tick() => {
                    if let Err(e) = self.poll_head(&mut window).await {
                        warn!(error = %e, "head poll failed");
                    }
                }
                _ = gas_tick.tick() => {
                    if let Err(e) = self.poll_gas_price().await {
                        debug!(error = %e, "gas price poll failed");
                    }
                }
                _ = purge_tick.tick() => {
                    self.cache.purge_expired();
                }
            }
        }

        info!("live update loop stopped");
    }

    async fn fetch_block(&self, method: &'static str, params: Value) -> Result<BlockHeader, CoreError> {
        let value = require_found(self.dispatcher.execute(&RpcRequest::read(method, params)).await?, "block")?;
        decode("block", &value)
    }

    /// One head tick against `window`, which only this loop mutates.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] if the node cannot be read or hands out an inconsistent chain; the
    /// window is left untouched in that case.
    pub async fn poll_head(&self, window: &mut HeadWindow) -> Result<HeadUpdate, CoreError> {
        let latest = self.fetch_block("eth_getBlockByNumber", json!(["latest", false])).await?;
        let latest_link = link_of(&latest)?;

        let Some(tip) = window.tip().copied() else {
            window.push(latest_link);
            self.chain.force_update_tip(latest_link.height, latest_link.hash);
            info!(height = latest.number, "live head seeded");
            self.registry.publish_blocks(&[added_event(&latest)]).await;
            return Ok(HeadUpdate::Seeded { height: latest.number });
        };

        if latest_link.hash == tip.hash {
            return Ok(HeadUpdate::Unchanged);
        }
        if latest.number < tip.height && window.hash_at(latest.number) == Some(latest_link.hash) {
            debug!(node_height = latest.number, tip = tip.height, "node is behind the retained head");
            return Ok(HeadUpdate::Unchanged);
        }

        let max_step = self.config.max_blocks_per_tick.max(1);
        let limit = tip.height.saturating_add(max_step);
        let (head, head_link) = if latest.number > limit {
            let block = self.fetch_block("eth_getBlockByNumber", json!([format_hex_u64(limit), false])).await?;
            let link = link_of(&block)?;
            (block, link)
        } else {
            (latest, latest_link)
        };

        // Descending; the last element is the lowest block not yet known to connect.
        let mut branch = vec![(head, head_link)];
        let mut lowest = head_link;
        let ancestor = loop {
            if lowest.height == 0 {
                break None;
            }
            let parent_height = lowest.height - 1;
            if window.hash_at(parent_height) == Some(lowest.parent_hash) {
                break Some(parent_height);
            }
            if window.lowest().is_some_and(|l| parent_height < l.height) {
                break None;
            }

            let parent = self.fetch_block("eth_getBlockByHash", json!([format_hash32(&lowest.parent_hash), false])).await?;
            let parent_link = link_of(&parent)?;
            if parent_link.hash != lowest.parent_hash || parent_link.height != parent_height {
                return Err(CoreError::Transient(format!("node returned an inconsistent parent for block {}", lowest.height)));
            }
            branch.push((parent, parent_link));
            lowest = parent_link;
        };

        let reverted = match ancestor {
            Some(height) => window.truncate_above(height),
            None => window.clear(),
        };

        let mut events = Vec::with_capacity(reverted.len() + branch.len() + 1);
        let mut common_ancestor = None;
        if let Some(first) = reverted.first() {
            let ancestor_height = first.height.saturating_sub(1);
            common_ancestor = Some(ancestor_height);
            self.cache.invalidate_from(first.height);
            warn!(
                common_ancestor = ancestor_height,
                depth = reverted.len(),
                deep = ancestor.is_none(),
                "chain reorganization detected"
            );
            events.push(ChainEvent::ReorgDetected { common_ancestor: ancestor_height, depth: reverted.len() as u64 });
            events.extend(
                reverted
                    .iter()
                    .map(|link| ChainEvent::BlockReverted { height: link.height, hash: format_hash32(&link.hash) }),
            );
        }

        let added = branch.len();
        let from = lowest.height;
        let to = head_link.height;
        for (block, link) in branch.into_iter().rev() {
            let pushed = window.push(link);
            debug_assert!(pushed, "branch must extend the retained window");
            events.push(added_event(&block));
        }
        self.chain.force_update_tip(head_link.height, head_link.hash);

        self.registry.publish_blocks(&events).await;
        self.publish_contract_logs(from, to).await;

        Ok(match common_ancestor {
            Some(common_ancestor) => HeadUpdate::Reorganized { common_ancestor, reverted: reverted.len(), added },
            None => {
                debug!(from, to, "head extended");
                HeadUpdate::Extended { from, to }
            }
        })
    }

    async fn publish_contract_logs(&self, from: u64, to: u64) {
        for (id, filter) in self.registry.contract_filters() {
            let request = RpcRequest::read("eth_getLogs", filter.with_range(from, to).to_params());
            let logs = match self.dispatcher.execute(&request).await {
                Ok(Value::Null) => continue,
                Ok(value) => decode::<Vec<LogRecord>>("logs", &value),
                Err(e) => Err(e),
            };
            match logs {
                Ok(mut logs) if !logs.is_empty() => {
                    logs.sort_by_key(|log| (log.block_number, log.log_index));
                    let events: Vec<ChainEvent> = logs.into_iter().map(ChainEvent::ContractLog).collect();
                    self.registry.publish_to_contract(id, &events).await;
                }
                Ok(_) => {}
                Err(e) => warn!(id, from, to, error = %e, "failed to fetch contract logs"),
            }
        }
    }

    /// Reads the node gas price and publishes it as a coalescing tick.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] if the node cannot be read.
    pub async fn poll_gas_price(&self) -> Result<GasPriceTick, CoreError> {
        let value = self.dispatcher.execute(&RpcRequest::read("eth_gasPrice", json!([]))).await?;
        let wei = value
            .as_str()
            .and_then(parse_hex_u128)
            .ok_or_else(|| CoreError::Decode { what: "gas price", reason: format!("expected hex quantity, got {value}") })?;
        let tick = GasPriceTick {
            prices: GasPrices::from_node_price(wei),
            observed_at_ms: chrono::Utc::now().timestamp_millis(),
        };
        self.registry.publish_gas(tick);
        Ok(tick)
    }
}
