//! Universal resolver and typed queries end to end over HTTP.

use crate::mock_infrastructure::{
    address, config_for, hash, transaction_response, BlockResponseBuilder, RpcMockBuilder,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use warpscan_core::{resolver::Resolved, CoreContext, CoreError};

#[tokio::test]
async fn test_block_number_query_is_served_from_cache_the_second_time() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_method_times("eth_getBlockByNumber", &BlockResponseBuilder::new(100).build(), 1);

    let ctx = CoreContext::from_config(config_for(&[node.url()])).await.unwrap();
    let cancel = CancellationToken::new();

    for _ in 0..2 {
        match ctx.resolver().resolve("100", &cancel).await.unwrap() {
            Resolved::Block(block) => assert_eq!(block.number, 100),
            other => panic!("unexpected {other:?}"),
        }
    }
    node.assert_all();
    assert_eq!(ctx.cache().stats().hits, 1);
}

#[tokio::test]
async fn test_address_query_combines_balance_nonce_and_code() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_method("eth_getBalance", &json!("0xde0b6b3a7640000"))
        .mock_method("eth_getTransactionCount", &json!("0x2"))
        .mock_method("eth_getCode", &json!("0x6080604052"));

    let ctx = CoreContext::from_config(config_for(&[node.url()])).await.unwrap();
    let input = address(0xabc).to_uppercase().replacen("0X", "0x", 1);

    match ctx.resolver().resolve(&input, &CancellationToken::new()).await.unwrap() {
        Resolved::Address { info, name } => {
            assert_eq!(info.address, address(0xabc));
            assert_eq!(info.balance, 1_000_000_000_000_000_000);
            assert_eq!(info.nonce, 2);
            assert!(info.is_contract);
            assert!(name.is_none());
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_hash_prefers_transaction() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_method("eth_getTransactionByHash", &transaction_response(&hash(7), 70));
    node.mock_method_times("eth_getBlockByHash", &json!(null), 0);

    let ctx = CoreContext::from_config(config_for(&[node.url()])).await.unwrap();
    match ctx.resolver().resolve(&hash(7), &CancellationToken::new()).await.unwrap() {
        Resolved::Transaction(tx) => {
            assert_eq!(tx.block_number, Some(70));
            assert_eq!(tx.value, 1_000_000_000_000_000_000);
        }
        other => panic!("unexpected {other:?}"),
    }
    node.assert_all();
}

#[tokio::test]
async fn test_hash_falls_back_to_block() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_method("eth_getTransactionByHash", &json!(null));
    node.mock_method("eth_getBlockByHash", &BlockResponseBuilder::new(12).with_hash(hash(0xb10c)).build());

    let ctx = CoreContext::from_config(config_for(&[node.url()])).await.unwrap();
    match ctx.resolver().resolve(&hash(0xb10c), &CancellationToken::new()).await.unwrap() {
        Resolved::Block(block) => assert_eq!(block.number, 12),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_hash_is_not_found() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_method("eth_getTransactionByHash", &json!(null));
    node.mock_method("eth_getBlockByHash", &json!(null));

    let ctx = CoreContext::from_config(config_for(&[node.url()])).await.unwrap();
    let err = ctx.resolver().resolve(&hash(1), &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn test_unrecognized_input_never_reaches_the_network() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_server_error_times(0);

    let ctx = CoreContext::from_config(config_for(&[node.url()])).await.unwrap();
    let cancel = CancellationToken::new();
    for input in ["", "hello world", "0x1234", "vitalik.eth"] {
        let err = ctx.resolver().resolve(input, &cancel).await.unwrap_err();
        assert!(matches!(err, CoreError::Unrecognized(_)), "{input:?} gave {err:?}");
    }
    node.assert_all();
}

#[tokio::test]
async fn test_gas_prices_derive_tiers_from_node_price() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_method("eth_gasPrice", &json!("0x3b9aca00"));

    let ctx = CoreContext::from_config(config_for(&[node.url()])).await.unwrap();
    let prices = ctx.explorer().gas_prices(&CancellationToken::new()).await.unwrap();

    assert_eq!(prices.standard, 1_000_000_000);
    assert_eq!(prices.slow, 800_000_000);
    assert_eq!(prices.fast, 1_200_000_000);
}
