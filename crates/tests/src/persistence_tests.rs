//! The `SQLite` tier across context restarts.

use crate::mock_infrastructure::{address, config_for, BlockResponseBuilder, RpcMockBuilder};
use serde_json::json;
use std::{path::Path, time::Duration};
use tokio_util::sync::CancellationToken;
use warpscan_core::{
    cache::{CacheStore, EntityKind, KindLimits, SqliteCacheStore, TtlClass},
    CoreContext,
};

/// Polls the store until `kind` holds exactly `expected` identifiers.
async fn rows_settle(path: &Path, kind: EntityKind, expected: &[&str]) -> Vec<String> {
    let store = SqliteCacheStore::open(path).await.unwrap();
    let mut ids = Vec::new();
    for _ in 0..200 {
        ids = store
            .load_all()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.identifier)
            .collect::<Vec<_>>();
        ids.sort();
        if ids == expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    ids
}

#[tokio::test]
async fn test_finalized_block_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("cache.db");

    let mut node = RpcMockBuilder::new().await;
    node.mock_method_times("eth_getBlockByNumber", &BlockResponseBuilder::new(5).build(), 1);
    let mut config = config_for(&[node.url()]);
    config.cache.persistent_path = Some(db.clone());

    {
        let ctx = CoreContext::from_config(config.clone()).await.unwrap();
        ctx.chain().observe_height(1_000);
        ctx.explorer().block_by_number(5, &CancellationToken::new()).await.unwrap().unwrap();
    }

    // Writes are mirrored in the background; wait until the record lands.
    let store = SqliteCacheStore::open(&db).await.unwrap();
    let mut persisted = None;
    for _ in 0..200 {
        persisted = store.get(EntityKind::Block, "5").await.unwrap();
        if persisted.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(persisted.expect("block mirrored to disk").ttl_class, TtlClass::Finalized);
    drop(store);

    let ctx = CoreContext::from_config(config).await.unwrap();
    let block = ctx.explorer().block_by_number(5, &CancellationToken::new()).await.unwrap().unwrap();
    assert_eq!(block.number, 5);

    let stats = ctx.cache().stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.fetches, 0);
    node.assert_all();
}

#[tokio::test]
async fn test_disabled_cache_ignores_persistent_path() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("unused.db");

    let mut node = RpcMockBuilder::new().await;
    node.mock_method_times("eth_getBlockByNumber", &BlockResponseBuilder::new(6).build(), 2);
    let mut config = config_for(&[node.url()]);
    config.cache.enabled = false;
    config.cache.persistent_path = Some(db.clone());

    let ctx = CoreContext::from_config(config).await.unwrap();
    let cancel = CancellationToken::new();
    ctx.explorer().block_by_number(6, &cancel).await.unwrap();
    ctx.explorer().block_by_number(6, &cancel).await.unwrap();

    node.assert_all();
    assert!(!db.exists());
}

#[tokio::test]
async fn test_evicted_block_row_is_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("cache.db");

    let mut node = RpcMockBuilder::new().await;
    node.mock_get_block_by_number(5, &BlockResponseBuilder::new(5).build())
        .mock_get_block_by_number(6, &BlockResponseBuilder::new(6).build());
    let mut config = config_for(&[node.url()]);
    config.cache.persistent_path = Some(db.clone());
    config.cache.block = KindLimits::new(1, 60);

    {
        let ctx = CoreContext::from_config(config.clone()).await.unwrap();
        ctx.chain().observe_height(1_000);
        let cancel = CancellationToken::new();
        ctx.explorer().block_by_number(5, &cancel).await.unwrap().unwrap();
        ctx.explorer().block_by_number(6, &cancel).await.unwrap().unwrap();
        assert_eq!(ctx.cache().stats().evictions, 1);
    }

    assert_eq!(rows_settle(&db, EntityKind::Block, &["6"]).await, ["6"]);

    let ctx = CoreContext::from_config(config).await.unwrap();
    let blocks = ctx.cache().stats().kinds.into_iter().find(|k| k.kind == EntityKind::Block).unwrap();
    assert_eq!(blocks.entries, 1);
}

#[tokio::test]
async fn test_expired_rows_are_purged_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("cache.db");

    let mut node = RpcMockBuilder::new().await;
    node.mock_method("eth_getBalance", &json!("0x1"))
        .mock_method("eth_getTransactionCount", &json!("0x0"))
        .mock_method("eth_getCode", &json!("0x"));
    let mut config = config_for(&[node.url()]);
    config.cache.persistent_path = Some(db.clone());
    config.cache.address = KindLimits::new(100, 1);

    let holder = address(0xfee);
    {
        let ctx = CoreContext::from_config(config.clone()).await.unwrap();
        ctx.explorer().address_info(&holder, &CancellationToken::new()).await.unwrap();
    }
    assert_eq!(rows_settle(&db, EntityKind::Address, &[holder.as_str()]).await, [holder.clone()]);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    let ctx = CoreContext::from_config(config).await.unwrap();
    assert!(ctx.cache().stats().kinds.iter().all(|k| k.entries == 0));

    let store = SqliteCacheStore::open(&db).await.unwrap();
    assert!(store.get(EntityKind::Address, &holder).await.unwrap().is_none());
}
