//! Wire types for JSON-RPC 2.0 and the typed records handed to consumers.
//!
//! Records are decoded from node responses (camelCase, hex quantities) and are also the
//! serialized form stored in the cache tiers, so every record round-trips through
//! `serde_json::Value` without loss. Wei amounts are carried as `u128` and serialized as hex
//! quantities, which keeps them representable as JSON strings.

use crate::utils::hex::{opt_quantity, quantity, quantity_u128};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{borrow::Cow, sync::Arc};

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// Pre-allocated `Cow` for the JSON-RPC version.
pub const JSONRPC_VERSION_COW: Cow<'static, str> = Cow::Borrowed(JSONRPC_VERSION);

/// JSON-RPC 2.0 request object as sent to a node.
///
/// ```
/// use warpscan_core::types::JsonRpcRequest;
/// use serde_json::json;
///
/// let request = JsonRpcRequest::new("eth_blockNumber", json!([]), json!(1));
/// assert_eq!(request.method, "eth_blockNumber");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    pub params: Value,
    pub id: Arc<Value>,
}

impl JsonRpcRequest {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value, id: Value) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, method: method.into(), params, id: Arc::new(id) }
    }
}

/// JSON-RPC 2.0 response. Exactly one of `result` and `error` is meaningful.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default = "default_version")]
    pub jsonrpc: Cow<'static, str>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
    #[serde(default)]
    pub id: Value,
}

fn default_version() -> Cow<'static, str> {
    JSONRPC_VERSION_COW
}

/// JSON-RPC 2.0 error object.
///
/// Standard codes: `-32700` parse error, `-32600` invalid request, `-32601` method not found,
/// `-32602` invalid params, `-32603` internal error, `-32000..=-32099` server defined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Block header as returned by `eth_getBlockByNumber(_, false)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    #[serde(with = "quantity")]
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    #[serde(with = "quantity")]
    pub timestamp: u64,
    #[serde(default)]
    pub miner: Option<String>,
    #[serde(with = "quantity")]
    pub gas_used: u64,
    #[serde(with = "quantity")]
    pub gas_limit: u64,
    #[serde(default, with = "opt_quantity", skip_serializing_if = "Option::is_none")]
    pub base_fee_per_gas: Option<u64>,
    #[serde(default)]
    pub transactions: Vec<String>,
}

/// Transaction as returned by `eth_getTransactionByHash`.
///
/// `block_number` is `None` while the transaction is pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub hash: String,
    #[serde(default, with = "opt_quantity")]
    pub block_number: Option<u64>,
    #[serde(default)]
    pub block_hash: Option<String>,
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(with = "quantity_u128")]
    pub value: u128,
    #[serde(with = "quantity")]
    pub gas: u64,
    #[serde(default, with = "opt_quantity_u128", skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<u128>,
    #[serde(with = "quantity")]
    pub nonce: u64,
    #[serde(default)]
    pub input: String,
}

impl TransactionRecord {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.block_number.is_none()
    }
}

/// Transaction receipt as returned by `eth_getTransactionReceipt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptRecord {
    pub transaction_hash: String,
    #[serde(with = "quantity")]
    pub block_number: u64,
    pub block_hash: String,
    #[serde(default, with = "opt_quantity", skip_serializing_if = "Option::is_none")]
    pub status: Option<u64>,
    #[serde(with = "quantity")]
    pub gas_used: u64,
    #[serde(default, with = "opt_quantity_u128", skip_serializing_if = "Option::is_none")]
    pub effective_gas_price: Option<u128>,
    #[serde(default)]
    pub contract_address: Option<String>,
    #[serde(default)]
    pub logs: Vec<LogRecord>,
}

impl ReceiptRecord {
    /// Post-Byzantium receipts carry `status == 1` on success.
    #[must_use]
    pub fn succeeded(&self) -> Option<bool> {
        self.status.map(|s| s == 1)
    }
}

/// A single event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(default, with = "opt_quantity")]
    pub block_number: Option<u64>,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default, with = "opt_quantity")]
    pub log_index: Option<u64>,
    #[serde(default)]
    pub removed: bool,
}

/// Filter for `eth_getLogs` and contract-event subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub address: Option<String>,
    /// Positional topic filters; `None` matches any topic at that position.
    #[serde(default)]
    pub topics: Vec<Option<String>>,
}

impl LogFilter {
    #[must_use]
    pub fn for_address(address: impl Into<String>) -> Self {
        Self { address: Some(address.into()), ..Self::default() }
    }

    /// Returns a copy restricted to the inclusive block range.
    #[must_use]
    pub fn with_range(&self, from: u64, to: u64) -> Self {
        Self { from_block: Some(from), to_block: Some(to), ..self.clone() }
    }

    /// Builds the single filter-object parameter for `eth_getLogs`.
    #[must_use]
    pub fn to_params(&self) -> Value {
        let mut filter = serde_json::Map::new();
        if let Some(from) = self.from_block {
            filter.insert("fromBlock".into(), json!(crate::utils::format_hex_u64(from)));
        }
        if let Some(to) = self.to_block {
            filter.insert("toBlock".into(), json!(crate::utils::format_hex_u64(to)));
        }
        if let Some(address) = &self.address {
            filter.insert("address".into(), json!(address));
        }
        if !self.topics.is_empty() {
            filter.insert("topics".into(), json!(self.topics));
        }
        json!([Value::Object(filter)])
    }
}

/// Balance, nonce and code presence of an account, captured at one height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInfo {
    pub address: String,
    #[serde(with = "quantity_u128")]
    pub balance: u128,
    pub nonce: u64,
    pub is_contract: bool,
    /// Chain tip when the snapshot was taken, if known.
    pub as_of_block: Option<u64>,
}

/// Gas price tiers derived from the node's suggested price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasPrices {
    #[serde(with = "quantity_u128")]
    pub slow: u128,
    #[serde(with = "quantity_u128")]
    pub standard: u128,
    #[serde(with = "quantity_u128")]
    pub fast: u128,
}

impl GasPrices {
    /// Slow and fast are 80% and 120% of the node price.
    #[must_use]
    pub fn from_node_price(wei: u128) -> Self {
        Self { slow: wei.saturating_mul(80) / 100, standard: wei, fast: wei.saturating_mul(120) / 100 }
    }
}

/// Verification metadata for a contract, from the block-explorer service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractInfo {
    pub address: String,
    pub is_verified: bool,
    pub contract_name: Option<String>,
    pub compiler_version: Option<String>,
    pub abi: Option<String>,
    pub source_code: Option<String>,
    pub implementation: Option<String>,
}

/// ERC-20 style token metadata, from the block-explorer service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
    pub total_supply: Option<String>,
}

/// Human readable network name for a chain id.
#[must_use]
pub fn network_name(chain_id: u64) -> &'static str {
    match chain_id {
        1 => "mainnet",
        11_155_111 => "sepolia",
        17_000 => "holesky",
        137 => "polygon",
        42_161 => "arbitrum",
        10 => "optimism",
        8_453 => "base",
        31_337 => "anvil",
        1_337 => "localhost",
        _ => "unknown",
    }
}

mod opt_quantity_u128 {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<u128>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&crate::utils::format_hex_u128(*v)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u128>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|s| {
            crate::utils::parse_hex_u128(&s)
                .ok_or_else(|| D::Error::custom(format!("invalid quantity: {s}")))
        })
        .transpose()
    }
}
