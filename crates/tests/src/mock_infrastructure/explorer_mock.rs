//! Block-explorer REST mock (`?module=..&action=..` GET requests).

use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};

pub struct ExplorerMockBuilder {
    server: ServerGuard,
    mocks: Vec<Mock>,
}

impl ExplorerMockBuilder {
    pub async fn new() -> Self {
        Self { server: Server::new_async().await, mocks: Vec::new() }
    }

    #[must_use]
    pub fn url(&self) -> String {
        self.server.url()
    }

    fn push(&mut self, module: &str, action: &str, body: Value, hits: Option<usize>) -> &mut Self {
        let mut mock = self
            .server
            .mock("GET", "/")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("module".into(), module.into()),
                Matcher::UrlEncoded("action".into(), action.into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string());
        if let Some(hits) = hits {
            mock = mock.expect(hits);
        }
        self.mocks.push(mock.create());
        self
    }

    /// `status: "1"` envelope around `result`, expected exactly `hits` times.
    pub fn mock_ok(&mut self, module: &str, action: &str, result: &Value, hits: usize) -> &mut Self {
        self.push(module, action, json!({ "status": "1", "message": "OK", "result": result }), Some(hits))
    }

    /// `status: "0"` envelope carrying `result` as the failure detail.
    pub fn mock_notok(&mut self, module: &str, action: &str, message: &str, result: &str) -> &mut Self {
        self.push(module, action, json!({ "status": "0", "message": message, "result": result }), None)
    }

    pub fn assert_all(&self) {
        for mock in &self.mocks {
            mock.assert();
        }
    }
}

/// A verified contract as returned by `contract.getsourcecode`.
#[must_use]
pub fn verified_contract(name: &str) -> Value {
    json!([{
        "SourceCode": "pragma solidity ^0.8.0; contract C {}",
        "ABI": "[]",
        "ContractName": name,
        "CompilerVersion": "v0.8.24+commit.e11b9ed9",
        "Implementation": ""
    }])
}
