//! Local development node discovery.

use crate::{
    error::CoreError,
    types::network_name,
    upstream::{Dispatcher, DispatcherConfig, EndpointConfig, EndpointPool, PoolConfig, RpcRequest, Transport},
    utils::hex::parse_hex_u64,
};
use serde::Serialize;
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

/// Ports used by anvil and hardhat out of the box.
pub const LOCAL_NODE_URLS: [&str; 4] = [
    "http://127.0.0.1:8545",
    "http://localhost:8545",
    "http://127.0.0.1:8546",
    "http://localhost:8546",
];

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectedNode {
    pub rpc_url: String,
    pub chain_id: u64,
    pub node_type: &'static str,
    pub network_name: &'static str,
}

fn node_type(chain_id: u64) -> &'static str {
    match chain_id {
        31_337 => "anvil",
        1_337 => "hardhat",
        _ => "local",
    }
}

/// Asks `url` for its chain id with a single attempt.
///
/// # Errors
///
/// Returns the [`CoreError`] of the failed probe.
pub async fn probe_node(transport: Arc<dyn Transport>, url: &str) -> Result<DetectedNode, CoreError> {
    let pool = Arc::new(EndpointPool::new(&[EndpointConfig::new("probe", url)], PoolConfig::default()));
    let config = DispatcherConfig {
        max_attempts: 1,
        request_timeout_ms: u64::try_from(PROBE_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
        ..DispatcherConfig::default()
    };
    let dispatcher = Dispatcher::new(pool, transport, config);

    let value = dispatcher.execute(&RpcRequest::read("eth_chainId", json!([]))).await?;
    let chain_id = value
        .as_str()
        .and_then(parse_hex_u64)
        .ok_or_else(|| CoreError::Decode { what: "chain id", reason: format!("got {value}") })?;

    Ok(DetectedNode {
        rpc_url: url.to_string(),
        chain_id,
        node_type: node_type(chain_id),
        network_name: network_name(chain_id),
    })
}

/// Returns the first of `urls` that answers `eth_chainId`.
pub async fn detect_node(transport: Arc<dyn Transport>, urls: &[&str]) -> Option<DetectedNode> {
    for url in urls {
        match probe_node(Arc::clone(&transport), url).await {
            Ok(node) => {
                info!(url, chain_id = node.chain_id, node_type = node.node_type, "local node found");
                return Some(node);
            }
            Err(e) => debug!(url, error = %e, "no node"),
        }
    }
    debug!("no local node on the common ports");
    None
}

/// Probes [`LOCAL_NODE_URLS`] in order.
pub async fn detect_local_node(transport: Arc<dyn Transport>) -> Option<DetectedNode> {
    detect_node(transport, &LOCAL_NODE_URLS).await
}
