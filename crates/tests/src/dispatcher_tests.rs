//! Failover, rate limiting and error classification over the real HTTP transport.

use crate::mock_infrastructure::{address, config_for, hash, BlockResponseBuilder, RpcMockBuilder};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use warpscan_core::{CoreContext, CoreError};

#[tokio::test]
async fn test_server_error_fails_over_to_next_endpoint() {
    let mut failing = RpcMockBuilder::new().await;
    failing.mock_server_error_times(1);
    let mut healthy = RpcMockBuilder::new().await;
    healthy.mock_get_block_by_number(5, &BlockResponseBuilder::new(5).build());

    let ctx = CoreContext::from_config(config_for(&[failing.url(), healthy.url()])).await.unwrap();
    let block = ctx.explorer().block_by_number(5, &CancellationToken::new()).await.unwrap().unwrap();

    assert_eq!(block.number, 5);
    failing.assert_all();
    let snapshot = ctx.dispatcher().pool().snapshot();
    assert_eq!(snapshot[0].consecutive_failures, 1);
    assert_eq!(snapshot[1].total_successes, 1);
    assert_eq!(ctx.dispatcher().stats().retries, 1);
}

#[tokio::test]
async fn test_rate_limited_endpoint_is_backed_off() {
    let mut limited = RpcMockBuilder::new().await;
    limited.mock_http_status(429);
    let mut healthy = RpcMockBuilder::new().await;
    healthy.mock_block_number(42);

    let ctx = CoreContext::from_config(config_for(&[limited.url(), healthy.url()])).await.unwrap();
    let cancel = CancellationToken::new();

    assert_eq!(ctx.explorer().block_number(&cancel).await.unwrap(), 42);
    let snapshot = ctx.dispatcher().pool().snapshot();
    assert!(snapshot[0].rate_limited_for_ms.is_some());

    // While backed off, the limited endpoint is not tried first.
    assert_eq!(ctx.explorer().block_number(&cancel).await.unwrap(), 42);
    assert_eq!(ctx.dispatcher().stats().retries, 1);
}

#[tokio::test]
async fn test_invalid_params_are_not_retried() {
    let mut rejecting = RpcMockBuilder::new().await;
    rejecting.mock_rpc_error("eth_getBalance", -32602, "invalid argument 0: hex string has length 3");
    let mut untouched = RpcMockBuilder::new().await;
    untouched.mock_server_error_times(0);

    let ctx = CoreContext::from_config(config_for(&[rejecting.url(), untouched.url()])).await.unwrap();
    let err = ctx.explorer().balance(&address(1), &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, CoreError::Permanent(_)), "got {err:?}");
    untouched.assert_all();
}

#[tokio::test]
async fn test_every_endpoint_failing_reports_exhaustion() {
    let mut first = RpcMockBuilder::new().await;
    first.mock_http_status(503);
    let mut second = RpcMockBuilder::new().await;
    second.mock_http_status(502);

    let ctx = CoreContext::from_config(config_for(&[first.url(), second.url()])).await.unwrap();
    let err = ctx.explorer().gas_prices(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, CoreError::EndpointsExhausted { .. }), "got {err:?}");
    assert_eq!(ctx.dispatcher().stats().exhausted, 1);
}

#[tokio::test]
async fn test_null_result_is_absence_not_failure() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_method("eth_getTransactionByHash", &json!(null));

    let ctx = CoreContext::from_config(config_for(&[node.url()])).await.unwrap();
    let tx = ctx.explorer().transaction(&hash(9), &CancellationToken::new()).await.unwrap();

    assert!(tx.is_none());
    assert_eq!(ctx.dispatcher().pool().snapshot()[0].consecutive_failures, 0);
}

#[tokio::test]
async fn test_cancelled_request_returns_cancelled() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_block_number(1);

    let ctx = CoreContext::from_config(config_for(&[node.url()])).await.unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert_eq!(ctx.explorer().block_number(&cancel).await.unwrap_err(), CoreError::Cancelled);
}
