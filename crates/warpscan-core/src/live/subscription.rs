//! Subscriber registry and per-subscriber delivery.
//!
//! Block and contract-log events travel over a bounded mpsc queue per subscriber. The
//! publisher waits for queue space up to `block_publish_timeout`; a subscriber still full after
//! that is torn down and its consumer sees [`SubscriptionError::Overflowed`] once it has drained
//! what was already queued. Gas ticks go through a single `watch` channel, so a slow consumer
//! only ever sees the latest tick.

use super::events::{ChainEvent, GasPriceTick};
use crate::types::LogFilter;
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    NewBlock,
    GasPrice,
    ContractEvent(LogFilter),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// The consumer fell behind on block events and was disconnected.
    #[error("subscription torn down: queue of {capacity} events stayed full")]
    Overflowed { capacity: usize },

    #[error("subscription closed")]
    Closed,
}

#[derive(Debug, Default)]
struct SinkState {
    overflowed: AtomicBool,
}

#[derive(Clone)]
struct EventSink {
    id: u64,
    filter: Option<LogFilter>,
    tx: mpsc::Sender<ChainEvent>,
    state: Arc<SinkState>,
}

enum Delivery {
    Events { rx: mpsc::Receiver<ChainEvent>, state: Arc<SinkState>, capacity: usize },
    Ticks(watch::Receiver<Option<GasPriceTick>>),
}

/// Consumer side of one subscription.
pub struct Subscription {
    id: u64,
    topic: Topic,
    delivery: Delivery,
    cursor: Option<u64>,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Height of the last canonical block delivered on this subscription.
    #[must_use]
    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    /// Waits for the next event.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::Overflowed`] after a teardown for slowness,
    /// [`SubscriptionError::Closed`] once the live loop is gone.
    pub async fn recv(&mut self) -> Result<ChainEvent, SubscriptionError> {
        match &mut self.delivery {
            Delivery::Events { rx, state, capacity } => {
                let Some(event) = rx.recv().await else {
                    return Err(if state.overflowed.load(Ordering::Acquire) {
                        SubscriptionError::Overflowed { capacity: *capacity }
                    } else {
                        SubscriptionError::Closed
                    });
                };
                match &event {
                    ChainEvent::BlockAdded { height, .. } => self.cursor = Some(*height),
                    ChainEvent::BlockReverted { height, .. } => self.cursor = height.checked_sub(1),
                    _ => {}
                }
                Ok(event)
            }
            Delivery::Ticks(rx) => {
                loop {
                    rx.changed().await.map_err(|_| SubscriptionError::Closed)?;
                    if let Some(tick) = *rx.borrow_and_update() {
                        return Ok(ChainEvent::GasPriceUpdated(tick));
                    }
                }
            }
        }
    }
}

/// Publisher side, owned by the live update loop.
pub(crate) struct Registry {
    next_id: AtomicU64,
    queue_capacity: usize,
    publish_timeout: Duration,
    blocks: Mutex<Vec<EventSink>>,
    contracts: Mutex<Vec<EventSink>>,
    gas: watch::Sender<Option<GasPriceTick>>,
}

impl Registry {
    pub(crate) fn new(queue_capacity: usize, publish_timeout: Duration) -> Self {
        let (gas, _) = watch::channel(None);
        Self {
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
            publish_timeout,
            blocks: Mutex::new(Vec::new()),
            contracts: Mutex::new(Vec::new()),
            gas,
        }
    }

    pub(crate) fn subscribe(&self, topic: Topic) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let delivery = match &topic {
            Topic::GasPrice => Delivery::Ticks(self.gas.subscribe()),
            Topic::NewBlock | Topic::ContractEvent(_) => {
                let (tx, rx) = mpsc::channel(self.queue_capacity);
                let state = Arc::new(SinkState::default());
                let filter = match &topic {
                    Topic::ContractEvent(filter) => Some(filter.clone()),
                    _ => None,
                };
                let sink = EventSink { id, filter, tx, state: Arc::clone(&state) };
                if sink.filter.is_some() {
                    self.contracts.lock().push(sink);
                } else {
                    self.blocks.lock().push(sink);
                }
                Delivery::Events { rx, state, capacity: self.queue_capacity }
            }
        };
        debug!(id, topic = ?topic, "subscription added");
        Subscription { id, topic, delivery, cursor: None }
    }

    #[cfg(test)]
    pub(crate) fn block_subscribers(&self) -> usize {
        self.blocks.lock().len()
    }

    /// Filters of the live contract-event subscriptions.
    pub(crate) fn contract_filters(&self) -> Vec<(u64, LogFilter)> {
        self.contracts.lock().iter().filter_map(|s| s.filter.clone().map(|f| (s.id, f))).collect()
    }

    /// Delivers block events to block subscribers, plus the reorg notice to contract
    /// subscribers (their logs above the ancestor are void).
    pub(crate) async fn publish_blocks(&self, events: &[ChainEvent]) {
        if events.is_empty() {
            return;
        }
        let sinks = self.blocks.lock().clone();
        self.deliver(&self.blocks, sinks, events).await;

        let reorgs: Vec<ChainEvent> =
            events.iter().filter(|e| matches!(e, ChainEvent::ReorgDetected { .. })).cloned().collect();
        if !reorgs.is_empty() {
            let sinks = self.contracts.lock().clone();
            self.deliver(&self.contracts, sinks, &reorgs).await;
        }
    }

    /// Delivers logs fetched for one contract subscription.
    pub(crate) async fn publish_to_contract(&self, id: u64, events: &[ChainEvent]) {
        let sinks: Vec<EventSink> = self.contracts.lock().iter().filter(|s| s.id == id).cloned().collect();
        self.deliver(&self.contracts, sinks, events).await;
    }

    pub(crate) fn publish_gas(&self, tick: GasPriceTick) {
        self.gas.send_replace(Some(tick));
    }

    async fn deliver(&self, list: &Mutex<Vec<EventSink>>, sinks: Vec<EventSink>, events: &[ChainEvent]) {
        let mut dead = Vec::new();
        'sinks: for sink in sinks {
            for event in events {
                match tokio::time::timeout(self.publish_timeout, sink.tx.send(event.clone())).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        debug!(id = sink.id, "subscriber went away");
                        dead.push(sink.id);
                        continue 'sinks;
                    }
                    Err(_) => {
                        sink.state.overflowed.store(true, Ordering::Release);
                        warn!(
                            id = sink.id,
                            capacity = self.queue_capacity,
                            "subscriber queue stayed full, tearing subscription down"
                        );
                        dead.push(sink.id);
                        continue 'sinks;
                    }
                }
            }
        }
        if !dead.is_empty() {
            list.lock().retain(|s| !dead.contains(&s.id));
        }
    }
}
