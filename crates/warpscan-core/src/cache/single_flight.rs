//! At most one in-flight fetch per cache key.
//!
//! The first caller for a key becomes the leader and owns a `watch` sender; everyone else
//! clones the receiver and waits. The fetch itself runs in a spawned task so that a waiter
//! giving up (cancellation) never aborts a fetch other waiters still want.
//!
//! ## Guard cleanup
//!
//! `FlightGuard` removes the map entry on drop, including when the fetch task panics. Removal
//! is conditional on the entry still being this flight's channel, so a late drop can never
//! evict a newer flight for the same key.

use super::types::CacheKey;
use crate::error::CoreError;
use ahash::RandomState;
use dashmap::{mapref::entry::Entry, DashMap};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub(crate) type FlightResult = Result<Arc<Value>, CoreError>;
type FlightMap = DashMap<CacheKey, watch::Receiver<Option<FlightResult>>, RandomState>;

pub(crate) enum Flight {
    Leader(FlightLeader),
    Follower(watch::Receiver<Option<FlightResult>>),
}

/// Held by the task performing the fetch.
pub(crate) struct FlightLeader {
    tx: watch::Sender<Option<FlightResult>>,
    _guard: FlightGuard,
}

impl FlightLeader {
    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<FlightResult>> {
        self.tx.subscribe()
    }

    /// Publishes the outcome to every waiter and releases the key.
    pub(crate) fn complete(self, result: FlightResult) {
        self.tx.send_replace(Some(result));
    }
}

struct FlightGuard {
    key: CacheKey,
    own: watch::Receiver<Option<FlightResult>>,
    inflight: Arc<FlightMap>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.inflight.remove_if(&self.key, |_, rx| rx.same_channel(&self.own));
    }
}

#[derive(Default)]
pub(crate) struct SingleFlight {
    inflight: Arc<FlightMap>,
}

impl SingleFlight {
    pub(crate) fn join(&self, key: &CacheKey) -> Flight {
        match self.inflight.entry(key.clone()) {
            Entry::Occupied(occupied) => Flight::Follower(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                let (tx, rx) = watch::channel(None);
                vacant.insert(rx.clone());
                Flight::Leader(FlightLeader {
                    tx,
                    _guard: FlightGuard { key: key.clone(), own: rx, inflight: Arc::clone(&self.inflight) },
                })
            }
        }
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.inflight.len()
    }
}

/// Waits for the flight behind `rx`, or for `cancel`.
pub(crate) async fn wait_for(
    mut rx: watch::Receiver<Option<FlightResult>>,
    cancel: &CancellationToken,
) -> FlightResult {
    loop {
        if let Some(result) = rx.borrow_and_update().clone() {
            return result;
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(CoreError::Cancelled),
            changed = rx.changed() => {
                if changed.is_err() {
                    return rx
                        .borrow()
                        .clone()
                        .unwrap_or_else(|| Err(CoreError::Transient("fetch abandoned".into())));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_second_join_follows_first() {
        let flights = SingleFlight::default();
        let key = CacheKey::block_number(1);

        let Flight::Leader(leader) = flights.join(&key) else { panic!("expected leader") };
        let Flight::Follower(rx) = flights.join(&key) else { panic!("expected follower") };
        assert_eq!(flights.in_flight(), 1);

        leader.complete(Ok(Arc::new(json!(7))));
        let result = wait_for(rx, &CancellationToken::new()).await.unwrap();
        assert_eq!(*result, json!(7));
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_dropped_leader_releases_waiters() {
        let flights = SingleFlight::default();
        let key = CacheKey::block_number(2);
        let Flight::Leader(leader) = flights.join(&key) else { panic!("expected leader") };
        let Flight::Follower(rx) = flights.join(&key) else { panic!("expected follower") };

        drop(leader);
        assert!(matches!(wait_for(rx, &CancellationToken::new()).await, Err(CoreError::Transient(_))));
        assert!(matches!(flights.join(&key), Flight::Leader(_)));
    }

    #[tokio::test]
    async fn test_cancelled_waiter_returns_without_result() {
        let flights = SingleFlight::default();
        let key = CacheKey::block_number(3);
        let Flight::Leader(_leader) = flights.join(&key) else { panic!("expected leader") };
        let Flight::Follower(rx) = flights.join(&key) else { panic!("expected follower") };

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(wait_for(rx, &cancel).await.unwrap_err(), CoreError::Cancelled);
        assert_eq!(flights.in_flight(), 1);
    }
}
