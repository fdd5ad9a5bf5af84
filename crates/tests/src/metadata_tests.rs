//! Contract and token metadata through the block-explorer transport.

use crate::mock_infrastructure::{address, config_for, verified_contract, ExplorerMockBuilder, RpcMockBuilder};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use warpscan_core::{config::AppConfig, CoreContext, CoreError};

fn config_with_explorer(node: &RpcMockBuilder, explorer: &ExplorerMockBuilder) -> AppConfig {
    let mut config = config_for(&[node.url()]);
    config.explorer.base_url = explorer.url();
    config.explorer.api_key = Some("test-key".into());
    config.explorer.rate_limit_per_second = 0.0;
    config
}

#[tokio::test]
async fn test_verified_contract_is_fetched_once_and_cached() {
    let node = RpcMockBuilder::new().await;
    let mut explorer = ExplorerMockBuilder::new().await;
    explorer.mock_ok("contract", "getsourcecode", &verified_contract("WrappedEther"), 1);

    let ctx = CoreContext::from_config(config_with_explorer(&node, &explorer)).await.unwrap();
    assert!(ctx.metadata().is_some());
    let cancel = CancellationToken::new();

    for _ in 0..2 {
        let info = ctx.explorer().contract_info(&address(0xc0), &cancel).await.unwrap().unwrap();
        assert!(info.is_verified);
        assert_eq!(info.contract_name.as_deref(), Some("WrappedEther"));
        assert!(info.implementation.is_none());
    }
    explorer.assert_all();
}

#[tokio::test]
async fn test_token_metadata_is_parsed() {
    let node = RpcMockBuilder::new().await;
    let mut explorer = ExplorerMockBuilder::new().await;
    explorer.mock_ok(
        "token",
        "tokeninfo",
        &json!([{ "tokenName": "Tether USD", "symbol": "USDT", "divisor": "6", "totalSupply": "1000" }]),
        1,
    );

    let ctx = CoreContext::from_config(config_with_explorer(&node, &explorer)).await.unwrap();
    let token = ctx.explorer().token_info(&address(0x70), &CancellationToken::new()).await.unwrap().unwrap();

    assert_eq!(token.symbol.as_deref(), Some("USDT"));
    assert_eq!(token.decimals, Some(6));
    assert_eq!(token.address, address(0x70));
}

#[tokio::test]
async fn test_no_data_found_is_none() {
    let node = RpcMockBuilder::new().await;
    let mut explorer = ExplorerMockBuilder::new().await;
    explorer.mock_notok("token", "tokeninfo", "NOTOK", "No data found");

    let ctx = CoreContext::from_config(config_with_explorer(&node, &explorer)).await.unwrap();
    let token = ctx.explorer().token_info(&address(0x71), &CancellationToken::new()).await.unwrap();
    assert!(token.is_none());
}

#[tokio::test]
async fn test_rate_limit_message_is_not_a_permanent_failure() {
    let node = RpcMockBuilder::new().await;
    let mut explorer = ExplorerMockBuilder::new().await;
    explorer.mock_notok("contract", "getsourcecode", "NOTOK", "Max rate limit reached");

    let ctx = CoreContext::from_config(config_with_explorer(&node, &explorer)).await.unwrap();
    let err = ctx.explorer().contract_info(&address(0xc1), &CancellationToken::new()).await.unwrap_err();

    assert!(
        matches!(err, CoreError::EndpointsExhausted { .. } | CoreError::RateLimited(_)),
        "got {err:?}"
    );
    let snapshot = ctx.metadata().unwrap().pool().snapshot();
    assert!(snapshot[0].rate_limited_for_ms.is_some());
}

#[tokio::test]
async fn test_metadata_without_api_key_is_rejected() {
    let node = RpcMockBuilder::new().await;
    let ctx = CoreContext::from_config(config_for(&[node.url()])).await.unwrap();

    let err = ctx.explorer().contract_info(&address(0xc2), &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, CoreError::Permanent(_)), "got {err:?}");
}
