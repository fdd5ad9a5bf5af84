//! Live update loop against an HTTP node.

use crate::mock_infrastructure::{config_for, BlockResponseBuilder, RpcMockBuilder};
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use warpscan_core::{
    live::{ChainEvent, HeadUpdate, Topic},
    CoreContext,
};

#[tokio::test]
async fn test_first_poll_seeds_head_and_publishes_it() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_latest_block(&BlockResponseBuilder::new(300).build());

    let ctx = CoreContext::from_config(config_for(&[node.url()])).await.unwrap();
    let mut sub = ctx.live().subscribe(Topic::NewBlock);
    let mut window = ctx.live().new_window();

    assert_eq!(ctx.live().poll_head(&mut window).await.unwrap(), HeadUpdate::Seeded { height: 300 });
    assert!(matches!(sub.recv().await.unwrap(), ChainEvent::BlockAdded { height: 300, .. }));
    assert_eq!(sub.cursor(), Some(300));
    assert_eq!(ctx.chain().current_tip(), 300);

    assert_eq!(ctx.live().poll_head(&mut window).await.unwrap(), HeadUpdate::Unchanged);
}

#[tokio::test]
async fn test_running_loop_streams_gas_ticks_until_cancelled() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_latest_block(&BlockResponseBuilder::new(10).build());
    node.mock_method("eth_gasPrice", &json!("0x77359400"));

    let mut config = config_for(&[node.url()]);
    config.live.gas_poll_interval_ms = 20;
    config.live.head_poll_interval_ms = 20;
    let ctx = CoreContext::from_config(config).await.unwrap();

    let mut gas = ctx.live().subscribe(Topic::GasPrice);
    let cancel = CancellationToken::new();
    let handle = ctx.start_live(cancel.clone());

    let event = tokio::time::timeout(Duration::from_secs(5), gas.recv()).await.unwrap().unwrap();
    match event {
        ChainEvent::GasPriceUpdated(tick) => assert_eq!(tick.prices.standard, 2_000_000_000),
        other => panic!("unexpected {other:?}"),
    }

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
}
