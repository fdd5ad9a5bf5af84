//! JSON-RPC node mock.
//!
//! Wraps mockito with Ethereum-specific response builders.

use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};

/// Builder for mock Ethereum JSON-RPC responses on a fresh mockito server.
pub struct RpcMockBuilder {
    server: ServerGuard,
    mocks: Vec<Mock>,
}

fn method_matcher(method: &str) -> Matcher {
    Matcher::Regex(format!(r#""method"\s*:\s*"{method}""#))
}

fn result_body(result: &Value) -> String {
    json!({ "jsonrpc": "2.0", "id": 1, "result": result }).to_string()
}

impl RpcMockBuilder {
    pub async fn new() -> Self {
        Self { server: Server::new_async().await, mocks: Vec::new() }
    }

    #[must_use]
    pub fn url(&self) -> String {
        self.server.url()
    }

    fn push(&mut self, matcher: Matcher, status: usize, body: String, hits: Option<usize>) -> &mut Self {
        let mut mock = self
            .server
            .mock("POST", "/")
            .match_body(matcher)
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body);
        if let Some(hits) = hits {
            mock = mock.expect(hits);
        }
        self.mocks.push(mock.create());
        self
    }

    /// Answers `method` with `result`, whatever the params.
    pub fn mock_method(&mut self, method: &str, result: &Value) -> &mut Self {
        self.push(method_matcher(method), 200, result_body(result), None)
    }

    /// Like [`RpcMockBuilder::mock_method`], but the mock must be hit exactly `hits` times.
    pub fn mock_method_times(&mut self, method: &str, result: &Value, hits: usize) -> &mut Self {
        self.push(method_matcher(method), 200, result_body(result), Some(hits))
    }

    /// `eth_getBlockByNumber` for one height.
    pub fn mock_get_block_by_number(&mut self, block_number: u64, response: &Value) -> &mut Self {
        let matcher = Matcher::Regex(format!(
            r#""method"\s*:\s*"eth_getBlockByNumber".*"params"\s*:\s*\["0x{block_number:x}""#
        ));
        self.push(matcher, 200, result_body(response), None)
    }

    /// `eth_getBlockByNumber("latest")`.
    pub fn mock_latest_block(&mut self, response: &Value) -> &mut Self {
        let matcher =
            Matcher::Regex(r#""method"\s*:\s*"eth_getBlockByNumber".*"params"\s*:\s*\["latest""#.to_string());
        self.push(matcher, 200, result_body(response), None)
    }

    pub fn mock_block_number(&mut self, block_number: u64) -> &mut Self {
        self.mock_method("eth_blockNumber", &json!(format!("0x{block_number:x}")))
    }

    pub fn mock_rpc_error(&mut self, method: &str, code: i32, message: &str) -> &mut Self {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": code, "message": message }
        })
        .to_string();
        self.push(method_matcher(method), 200, body, None)
    }

    /// Answers every request with `status`.
    pub fn mock_http_status(&mut self, status: usize) -> &mut Self {
        self.push(Matcher::Any, status, format!("status {status}"), None)
    }

    /// Every request fails with 500 and must arrive exactly `hits` times.
    pub fn mock_server_error_times(&mut self, hits: usize) -> &mut Self {
        self.push(Matcher::Any, 500, "Internal Server Error".to_string(), Some(hits))
    }

    /// Asserts every mock created with an expected hit count got exactly that many.
    pub fn assert_all(&self) {
        for mock in &self.mocks {
            mock.assert();
        }
    }

    #[must_use]
    pub fn verify_all_called(&self) -> bool {
        self.mocks.iter().all(Mock::matched)
    }
}

/// Builder for block responses (transaction hashes only).
pub struct BlockResponseBuilder {
    number: u64,
    hash: String,
    parent_hash: String,
    transactions: Vec<String>,
    timestamp: u64,
}

impl BlockResponseBuilder {
    #[must_use]
    pub fn new(number: u64) -> Self {
        Self {
            number,
            hash: format!("0x{number:064x}"),
            parent_hash: format!("0x{:064x}", number.saturating_sub(1)),
            transactions: Vec::new(),
            timestamp: 1_600_000_000 + number,
        }
    }

    #[must_use]
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = hash.into();
        self
    }

    #[must_use]
    pub fn with_parent_hash(mut self, hash: impl Into<String>) -> Self {
        self.parent_hash = hash.into();
        self
    }

    #[must_use]
    pub fn with_transactions(mut self, hashes: Vec<String>) -> Self {
        self.transactions = hashes;
        self
    }

    #[must_use]
    pub fn build(self) -> Value {
        json!({
            "number": format!("0x{:x}", self.number),
            "hash": self.hash,
            "parentHash": self.parent_hash,
            "timestamp": format!("0x{:x}", self.timestamp),
            "transactions": self.transactions,
            "gasLimit": "0x1c9c380",
            "gasUsed": "0x5208",
            "baseFeePerGas": "0x7",
            "miner": "0x0000000000000000000000000000000000000000"
        })
    }
}

/// A mined transfer transaction.
#[must_use]
pub fn transaction_response(hash: &str, block_number: u64) -> Value {
    json!({
        "hash": hash,
        "blockNumber": format!("0x{block_number:x}"),
        "blockHash": format!("0x{block_number:064x}"),
        "from": "0x0000000000000000000000000000000000000001",
        "to": "0x0000000000000000000000000000000000000002",
        "value": "0xde0b6b3a7640000",
        "gas": "0x5208",
        "gasPrice": "0x3b9aca00",
        "nonce": "0x4",
        "input": "0x"
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rpc_mock_builder_creation() {
        let mock = RpcMockBuilder::new().await;
        assert!(mock.url().starts_with("http://"));
    }

    #[test]
    fn test_block_response_links_to_parent() {
        let block = BlockResponseBuilder::new(16).build();
        assert_eq!(block["number"], "0x10");
        assert_eq!(block["parentHash"], format!("0x{:064x}", 15));
    }
}
