//! Two-tier cache manager.
//!
//! # Read path
//!
//! ```text
//! get_or_fetch(key)
//!   ├─ memory hit (not expired)      -> value
//!   └─ miss -> SingleFlight::join(key)
//!        ├─ follower                 -> wait for the leader's result
//!        └─ leader -> spawn fetch    -> classify TTL -> memory -> persist channel
//! ```
//!
//! # Reorg handling
//!
//! `invalidate_from(h)` bumps the reorg epoch under the write side of `reorg_gate`. A fetch
//! that started under an older epoch and carries a height is returned to its waiters but not
//! stored, so a slow fetch cannot resurrect a block that was just reverted.

use super::{
    config::CacheConfig,
    memory::{InsertOutcome, MemoryTier},
    persist::{run_persist_worker, PersistOp},
    single_flight::{wait_for, Flight, SingleFlight},
    store::{CacheStore, CacheStoreError, StoredRecord},
    types::{CacheEntry, CacheKey, EntityKind, Fetched, TtlClass},
};
use crate::{chain::ChainState, error::CoreError};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    fetch_errors: AtomicU64,
    coalesced: AtomicU64,
    invalidated: AtomicU64,
    evictions: AtomicU64,
    stale_discarded: AtomicU64,
}

/// Entry count and capacity of one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KindStats {
    pub kind: EntityKind,
    pub entries: usize,
    pub capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub kinds: Vec<KindStats>,
    pub hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub fetch_errors: u64,
    /// Callers that waited on another caller's fetch instead of issuing their own.
    pub coalesced: u64,
    pub invalidated: u64,
    pub evictions: u64,
    pub stale_discarded: u64,
    pub in_flight: usize,
    pub reorg_epoch: u64,
}

struct CacheInner {
    config: CacheConfig,
    memory: MemoryTier,
    flights: SingleFlight,
    chain: Arc<ChainState>,
    store: Option<Arc<dyn CacheStore>>,
    persist_tx: Option<mpsc::UnboundedSender<PersistOp>>,
    /// Current reorg epoch; read-locked while storing, write-locked while invalidating.
    reorg_gate: RwLock<u64>,
    stats: CacheCounters,
}

pub struct CacheManager {
    inner: Arc<CacheInner>,
}

impl CacheManager {
    /// Memory-only cache.
    #[must_use]
    pub fn new(config: CacheConfig, chain: Arc<ChainState>) -> Self {
        Self::build(config, chain, None)
    }

    /// Cache mirrored to `store` by a background writer.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime, since the writer task is spawned here.
    #[must_use]
    pub fn with_store(config: CacheConfig, chain: Arc<ChainState>, store: Arc<dyn CacheStore>) -> Self {
        Self::build(config, chain, Some(store))
    }

    fn build(config: CacheConfig, chain: Arc<ChainState>, store: Option<Arc<dyn CacheStore>>) -> Self {
        let persist_tx = store.as_ref().map(|store| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_persist_worker(rx, Arc::clone(store)));
            tx
        });

        Self {
            inner: Arc::new(CacheInner {
                memory: MemoryTier::new(&config),
                config,
                flights: SingleFlight::default(),
                chain,
                store,
                persist_tx,
                reorg_gate: RwLock::new(0),
                stats: CacheCounters::default(),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Returns a live cached value without fetching.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<Arc<Value>> {
        if !self.inner.config.enabled {
            return None;
        }
        let entry = self.inner.memory.get(key, Instant::now());
        let counter = if entry.is_some() { &self.inner.stats.hits } else { &self.inner.stats.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        entry.map(|e| e.value)
    }

    /// Returns the cached value for `key`, or runs `fetch` exactly once across all concurrent
    /// callers for that key.
    ///
    /// `cancel` only abandons this caller's wait; the fetch keeps running for the others and
    /// still populates the cache.
    ///
    /// # Errors
    ///
    /// Returns the fetch error (identical for every waiter), or [`CoreError::Cancelled`].
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &CacheKey,
        cancel: &CancellationToken,
        fetch: F,
    ) -> Result<Arc<Value>, CoreError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Fetched, CoreError>> + Send + 'static,
    {
        if let Some(value) = self.get(key) {
            trace!(key = %key, "cache hit");
            return Ok(value);
        }

        let rx = match self.inner.flights.join(key) {
            Flight::Follower(rx) => {
                self.inner.stats.coalesced.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, "joining in-flight fetch");
                rx
            }
            Flight::Leader(leader) => {
                // A flight that finished between the lookup and the join may have filled it.
                if self.inner.config.enabled {
                    if let Some(entry) = self.inner.memory.get(key, Instant::now()) {
                        leader.complete(Ok(Arc::clone(&entry.value)));
                        return Ok(entry.value);
                    }
                }

                let rx = leader.subscribe();
                self.inner.stats.fetches.fetch_add(1, Ordering::Relaxed);
                let inner = Arc::clone(&self.inner);
                let key = key.clone();
                tokio::spawn(async move {
                    let epoch = *inner.reorg_gate.read();
                    let result = match fetch().await {
                        Ok(fetched) => Ok(inner.store_fetched(&key, fetched, epoch)),
                        Err(e) => {
                            inner.stats.fetch_errors.fetch_add(1, Ordering::Relaxed);
                            debug!(key = %key, error = %e, "fetch failed, nothing cached");
                            Err(e)
                        }
                    };
                    leader.complete(result);
                });
                rx
            }
        };

        wait_for(rx, cancel).await
    }

    /// Removes every block, transaction and address entry tied to a height `>= height`,
    /// finalized or not. Called by the live update loop on a confirmed reorg.
    pub fn invalidate_from(&self, height: u64) -> usize {
        let mut epoch = self.inner.reorg_gate.write();
        *epoch += 1;
        let removed = self.inner.memory.invalidate_from(height);
        self.inner.persist(PersistOp::RemoveFromHeight(height));
        drop(epoch);

        self.inner.stats.invalidated.fetch_add(removed as u64, Ordering::Relaxed);
        info!(height, removed, "cache invalidated from height");
        removed
    }

    /// Drops expired entries from memory and their rows from the persistent tier.
    pub fn purge_expired(&self) -> usize {
        let removed = self.inner.memory.purge_expired(Instant::now());
        self.inner.persist(PersistOp::RemoveExpired(chrono::Utc::now().timestamp_millis()));
        if removed > 0 {
            debug!(removed, "expired cache entries purged");
        }
        removed
    }

    /// Empties both tiers. Returns once every write queued before the call, and the clear
    /// itself, has reached the persistent tier.
    pub async fn clear(&self) {
        self.inner.memory.clear();
        self.inner.persist(PersistOp::Clear);
        if self.inner.persist_tx.is_some() {
            let (done, applied) = oneshot::channel();
            self.inner.persist(PersistOp::Barrier(done));
            if applied.await.is_err() {
                warn!("cache persistence worker stopped before the clear was confirmed");
            }
        }
        info!("cache cleared");
    }

    /// Pre-populates the memory tier from the persistent tier. Keys already present in memory
    /// win; expired records are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`CacheStoreError`] if the store cannot be read.
    pub async fn warm_from_store(&self) -> Result<usize, CacheStoreError> {
        let Some(store) = &self.inner.store else { return Ok(0) };
        if !self.inner.config.enabled {
            return Ok(0);
        }

        let now = Instant::now();
        let now_ms = chrono::Utc::now().timestamp_millis();
        let expired = store.remove_expired(now_ms).await?;
        let records = store.load_all().await?;
        let mut warmed = 0usize;
        let mut evicted = 0usize;

        for record in records {
            let age = Duration::from_millis(u64::try_from(now_ms - record.fetched_at_ms).unwrap_or(0));
            let ttl = record.ttl_secs.map(Duration::from_secs);
            if ttl.is_some_and(|ttl| age >= ttl) {
                continue;
            }

            let value: Value = match serde_json::from_str(&record.payload) {
                Ok(value) => value,
                Err(e) => {
                    warn!(kind = %record.kind, id = %record.identifier, error = %e, "skipping corrupt cache payload");
                    continue;
                }
            };

            let key = CacheKey::new(record.kind, &record.identifier);
            if self.inner.memory.contains(&key, now) {
                continue;
            }
            let entry = CacheEntry {
                value: Arc::new(value),
                fetched_at: now.checked_sub(age).unwrap_or(now),
                ttl_class: record.ttl_class,
                ttl,
                height: record.height,
            };
            match self.inner.memory.insert(&key, entry) {
                InsertOutcome::KeptFinalized => {}
                InsertOutcome::Inserted => warmed += 1,
                InsertOutcome::Evicted(old) => {
                    // Records load oldest first, so the row pushed out is older than this one.
                    store.remove(record.kind, &old).await?;
                    warmed += 1;
                    evicted += 1;
                }
            }
        }

        info!(warmed, expired, evicted, "cache warmed from persistent tier");
        Ok(warmed)
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = &self.inner;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CacheStats {
            enabled: inner.config.enabled,
            kinds: EntityKind::ALL
                .iter()
                .map(|kind| KindStats {
                    kind: *kind,
                    entries: inner.memory.len(*kind),
                    capacity: inner.config.limits(*kind).max_entries,
                })
                .collect(),
            hits: load(&inner.stats.hits),
            misses: load(&inner.stats.misses),
            fetches: load(&inner.stats.fetches),
            fetch_errors: load(&inner.stats.fetch_errors),
            coalesced: load(&inner.stats.coalesced),
            invalidated: load(&inner.stats.invalidated),
            evictions: load(&inner.stats.evictions),
            stale_discarded: load(&inner.stats.stale_discarded),
            in_flight: inner.flights.in_flight(),
            reorg_epoch: *inner.reorg_gate.read(),
        }
    }
}

impl CacheInner {
    /// Expiry policy for a freshly fetched value.
    fn classify(&self, kind: EntityKind, fetched: &Fetched) -> (TtlClass, Option<Duration>) {
        match (kind, fetched.height) {
            (EntityKind::Block | EntityKind::Transaction, Some(height)) if !fetched.pending => {
                if self.chain.is_finalized(height) {
                    (TtlClass::Finalized, None)
                } else {
                    (TtlClass::BestEffort, Some(self.config.best_effort_ttl()))
                }
            }
            _ => (TtlClass::Volatile, Some(self.config.limits(kind).ttl())),
        }
    }

    fn store_fetched(&self, key: &CacheKey, fetched: Fetched, started_epoch: u64) -> Arc<Value> {
        let (ttl_class, ttl) = self.classify(key.kind(), &fetched);
        let height = fetched.height;
        let value = Arc::new(fetched.value);
        if !self.config.enabled {
            return value;
        }

        let epoch = self.reorg_gate.read();
        if height.is_some() && *epoch != started_epoch {
            self.stats.stale_discarded.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "fetch raced a reorg invalidation, not caching");
            return value;
        }

        let entry = CacheEntry { value: Arc::clone(&value), fetched_at: Instant::now(), ttl_class, ttl, height };
        let evicted = match self.memory.insert(key, entry) {
            InsertOutcome::KeptFinalized => return value,
            InsertOutcome::Evicted(old) => {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                Some(old)
            }
            InsertOutcome::Inserted => None,
        };

        if self.persist_tx.is_some() {
            match serde_json::to_string(value.as_ref()) {
                Ok(payload) => self.persist(PersistOp::Put(StoredRecord {
                    kind: key.kind(),
                    identifier: key.id().to_string(),
                    payload,
                    ttl_class,
                    ttl_secs: ttl.map(|t| t.as_secs()),
                    height,
                    fetched_at_ms: chrono::Utc::now().timestamp_millis(),
                })),
                Err(e) => warn!(key = %key, error = %e, "failed to serialize cache entry"),
            }
            if let Some(old) = evicted {
                self.persist(PersistOp::Remove(key.kind(), old.to_string()));
            }
        }
        drop(epoch);

        trace!(key = %key, class = ttl_class.as_str(), "cached");
        value
    }

    fn persist(&self, op: PersistOp) {
        if let Some(tx) = &self.persist_tx {
            if tx.send(op).is_err() {
                warn!("cache persistence worker is gone, dropping write");
            }
        }
    }
}
