//! Background writer mirroring in-memory changes to the persistent tier.
//!
//! The cache manager never awaits the store on the request path: it pushes a [`PersistOp`]
//! onto an unbounded channel and this worker applies them in order. Store failures are
//! logged and dropped; the in-memory tier stays authoritative.

use super::{store::CacheStore, types::EntityKind, StoredRecord};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub(crate) enum PersistOp {
    Put(StoredRecord),
    Remove(EntityKind, String),
    RemoveFromHeight(u64),
    /// Drops rows whose TTL ran out before this unix millisecond.
    RemoveExpired(i64),
    Clear,
    /// Acknowledged once every earlier operation has been applied.
    Barrier(oneshot::Sender<()>),
}

/// Applies queued operations until every sender is dropped, then drains what is left.
pub(crate) async fn run_persist_worker(
    mut rx: mpsc::UnboundedReceiver<PersistOp>,
    store: Arc<dyn CacheStore>,
) {
    let mut applied = 0u64;
    while let Some(op) = rx.recv().await {
        apply(store.as_ref(), op).await;
        applied += 1;
    }
    info!(applied, "cache persistence worker stopped");
}

async fn apply(store: &dyn CacheStore, op: PersistOp) {
    let result = match op {
        PersistOp::Put(record) => store.put(&record).await,
        PersistOp::Remove(kind, identifier) => store.remove(kind, &identifier).await,
        PersistOp::RemoveFromHeight(height) => store.remove_from_height(height).await.map(|removed| {
            debug!(height, removed, "persistent tier invalidated");
        }),
        PersistOp::RemoveExpired(now_ms) => store.remove_expired(now_ms).await.map(|removed| {
            debug!(removed, "expired rows purged from persistent tier");
        }),
        PersistOp::Clear => store.clear().await,
        PersistOp::Barrier(done) => {
            let _ = done.send(());
            Ok(())
        }
    };
    if let Err(e) = result {
        warn!(error = %e, "cache persistence write failed");
    }
}
