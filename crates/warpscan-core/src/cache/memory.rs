use super::{
    config::CacheConfig,
    types::{CacheEntry, CacheKey, EntityKind},
};
use lru::LruCache;
use parking_lot::Mutex;
use std::{num::NonZeroUsize, sync::Arc};
use tokio::time::Instant;

/// Result of offering an entry to the in-memory tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InsertOutcome {
    Inserted,
    /// The key already held a finalized entry, which stays.
    KeptFinalized,
    /// Inserting pushed the least recently used entry of that kind out; carries its id.
    Evicted(Arc<str>),
}

/// Fast tier: one bounded LRU per entity kind.
pub(crate) struct MemoryTier {
    shards: Vec<Mutex<LruCache<Arc<str>, CacheEntry>>>,
}

impl MemoryTier {
    pub(crate) fn new(config: &CacheConfig) -> Self {
        let shards = EntityKind::ALL
            .iter()
            .map(|kind| {
                let capacity = NonZeroUsize::new(config.limits(*kind).max_entries)
                    .unwrap_or(NonZeroUsize::MIN);
                Mutex::new(LruCache::new(capacity))
            })
            .collect();
        Self { shards }
    }

    fn shard(&self, kind: EntityKind) -> &Mutex<LruCache<Arc<str>, CacheEntry>> {
        &self.shards[kind.index()]
    }

    /// Returns a live entry and promotes it; expired entries are dropped on the way.
    pub(crate) fn get(&self, key: &CacheKey, now: Instant) -> Option<CacheEntry> {
        let mut shard = self.shard(key.kind()).lock();
        let expired = match shard.get(key.id()) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            shard.pop(key.id());
        }
        None
    }

    pub(crate) fn contains(&self, key: &CacheKey, now: Instant) -> bool {
        self.shard(key.kind()).lock().peek(key.id()).is_some_and(|e| !e.is_expired(now))
    }

    /// Stores `entry` unless a finalized entry already occupies the key.
    pub(crate) fn insert(&self, key: &CacheKey, entry: CacheEntry) -> InsertOutcome {
        let mut shard = self.shard(key.kind()).lock();
        if shard.peek(key.id()).is_some_and(CacheEntry::is_finalized) {
            return InsertOutcome::KeptFinalized;
        }
        match shard.push(Arc::clone(key.id_arc()), entry) {
            Some((old_key, _)) if old_key.as_ref() != key.id() => InsertOutcome::Evicted(old_key),
            _ => InsertOutcome::Inserted,
        }
    }

    /// Removes every block-scoped entry tied to a height `>= height`.
    pub(crate) fn invalidate_from(&self, height: u64) -> usize {
        let mut removed = 0;
        for kind in EntityKind::BLOCK_SCOPED {
            let mut shard = self.shard(kind).lock();
            let stale: Vec<Arc<str>> = shard
                .iter()
                .filter(|(_, entry)| entry.height.is_some_and(|h| h >= height))
                .map(|(id, _)| Arc::clone(id))
                .collect();
            for id in stale {
                shard.pop(&id);
                removed += 1;
            }
        }
        removed
    }

    /// Drops expired entries of every kind.
    pub(crate) fn purge_expired(&self, now: Instant) -> usize {
        let mut removed = 0;
        for kind in EntityKind::ALL {
            let mut shard = self.shard(kind).lock();
            let expired: Vec<Arc<str>> = shard
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(id, _)| Arc::clone(id))
                .collect();
            for id in expired {
                shard.pop(&id);
                removed += 1;
            }
        }
        removed
    }

    pub(crate) fn len(&self, kind: EntityKind) -> usize {
        self.shard(kind).lock().len()
    }

    pub(crate) fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{config::KindLimits, types::TtlClass};
    use serde_json::json;
    use std::time::Duration;

    fn entry(value: u64, class: TtlClass, height: Option<u64>) -> CacheEntry {
        CacheEntry {
            value: Arc::new(json!(value)),
            fetched_at: Instant::now(),
            ttl_class: class,
            ttl: (class != TtlClass::Finalized).then(|| Duration::from_secs(10)),
            height,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_eviction_per_kind() {
        let config = CacheConfig { block: KindLimits::new(2, 10), ..CacheConfig::default() };
        let tier = MemoryTier::new(&config);

        tier.insert(&CacheKey::block_number(1), entry(1, TtlClass::Finalized, Some(1)));
        tier.insert(&CacheKey::block_number(2), entry(2, TtlClass::Finalized, Some(2)));
        // Touch 1 so 2 becomes the eviction candidate.
        assert!(tier.get(&CacheKey::block_number(1), Instant::now()).is_some());
        let outcome = tier.insert(&CacheKey::block_number(3), entry(3, TtlClass::Finalized, Some(3)));

        assert_eq!(outcome, InsertOutcome::Evicted(Arc::from("2")));
        assert_eq!(tier.len(EntityKind::Block), 2);
        assert!(tier.get(&CacheKey::block_number(2), Instant::now()).is_none());
        assert!(tier.get(&CacheKey::block_number(1), Instant::now()).is_some());
        // Other kinds are unaffected by block pressure.
        tier.insert(&CacheKey::transaction("0x1"), entry(9, TtlClass::Volatile, None));
        assert_eq!(tier.len(EntityKind::Transaction), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalized_not_replaced() {
        let tier = MemoryTier::new(&CacheConfig::default());
        let key = CacheKey::block_number(5);
        tier.insert(&key, entry(1, TtlClass::Finalized, Some(5)));
        assert_eq!(tier.insert(&key, entry(2, TtlClass::BestEffort, Some(5))), InsertOutcome::KeptFinalized);
        assert_eq!(*tier.get(&key, Instant::now()).unwrap().value, json!(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_dropped_on_read() {
        let tier = MemoryTier::new(&CacheConfig::default());
        let key = CacheKey::address("0xaa");
        tier.insert(&key, entry(1, TtlClass::Volatile, None));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(tier.get(&key, Instant::now()).is_none());
        assert_eq!(tier.len(EntityKind::Address), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_from_height() {
        let tier = MemoryTier::new(&CacheConfig::default());
        tier.insert(&CacheKey::block_number(9), entry(9, TtlClass::Finalized, Some(9)));
        tier.insert(&CacheKey::block_number(10), entry(10, TtlClass::Finalized, Some(10)));
        tier.insert(&CacheKey::transaction("0x1"), entry(1, TtlClass::BestEffort, Some(11)));
        tier.insert(&CacheKey::address("0xaa"), entry(1, TtlClass::Volatile, Some(12)));
        tier.insert(&CacheKey::contract("0xaa"), entry(1, TtlClass::Volatile, None));

        assert_eq!(tier.invalidate_from(10), 3);
        assert!(tier.contains(&CacheKey::block_number(9), Instant::now()));
        assert!(!tier.contains(&CacheKey::block_number(10), Instant::now()));
        assert!(tier.contains(&CacheKey::contract("0xaa"), Instant::now()));
    }
}
