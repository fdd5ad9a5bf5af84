//! Block-explorer REST service (Etherscan V2 style) as a [`Transport`].
//!
//! Requests reuse [`RpcRequest`]: the method is `"module.action"` and the params are a flat
//! JSON object turned into query parameters. Responses arrive in a `{status, message, result}`
//! envelope; `status == "0"` is mapped onto the same error classes as JSON-RPC failures so the
//! dispatcher can retry, back off and fail over exactly as it does for nodes.

use crate::upstream::{
    errors::sanitize_network_error, Endpoint, EndpointConfig, RpcRequest, Transport, UpstreamError,
};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExplorerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Falls back to `ETHERSCAN_API_KEY` when loading [`crate::config::AppConfig`].
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_second: f64,
}

fn default_base_url() -> String {
    "https://api.etherscan.io/v2/api".to_string()
}

fn default_chain_id() -> u64 {
    1
}

fn default_rate_limit() -> f64 {
    5.0
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            chain_id: default_chain_id(),
            rate_limit_per_second: default_rate_limit(),
        }
    }
}

impl ExplorerConfig {
    /// The service is only usable with an API key.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    /// Single-endpoint pool entry for the service.
    #[must_use]
    pub fn endpoint(&self) -> EndpointConfig {
        let burst = self.rate_limit_per_second.ceil().max(1.0) as u32;
        EndpointConfig::new("block-explorer", self.base_url.clone())
            .with_rate_limit(self.rate_limit_per_second, burst)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: Value,
}

pub struct ExplorerTransport {
    client: Client,
    api_key: String,
    chain_id: u64,
}

impl ExplorerTransport {
    /// # Errors
    ///
    /// Returns [`UpstreamError::Network`] if the reqwest client fails to build.
    pub fn new(api_key: impl Into<String>, chain_id: u64) -> Result<Self, UpstreamError> {
        let client = ClientBuilder::new()
            .connect_timeout(Duration::from_secs(5))
            .use_rustls_tls()
            .user_agent(concat!("warpscan/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, api_key: api_key.into(), chain_id })
    }

    fn query(&self, request: &RpcRequest) -> Result<Vec<(String, String)>, UpstreamError> {
        let mut query = build_query(request)?;
        query.push(("chainid".into(), self.chain_id.to_string()));
        query.push(("apikey".into(), self.api_key.clone()));
        Ok(query)
    }
}

/// Splits `"module.action"` and flattens the params object into query pairs.
fn build_query(request: &RpcRequest) -> Result<Vec<(String, String)>, UpstreamError> {
    let (module, action) = request
        .method
        .split_once('.')
        .filter(|(m, a)| !m.is_empty() && !a.is_empty())
        .ok_or_else(|| UpstreamError::InvalidRequest(format!("expected module.action, got {}", request.method)))?;

    let mut query = vec![("module".to_string(), module.to_string()), ("action".to_string(), action.to_string())];
    match &request.params {
        Value::Null => {}
        Value::Object(params) => {
            for (name, value) in params {
                let value = match value {
                    Value::String(s) => s.clone(),
                    Value::Null => continue,
                    other => other.to_string(),
                };
                query.push((name.clone(), value));
            }
        }
        _ => return Err(UpstreamError::InvalidRequest("explorer params must be an object".into())),
    }
    Ok(query)
}

/// Maps the response envelope onto a result or a classified error.
fn interpret_envelope(envelope: Envelope) -> Result<Value, UpstreamError> {
    if envelope.status != "0" {
        return Ok(envelope.result);
    }

    let detail = match &envelope.result {
        Value::String(s) if !s.is_empty() => s.clone(),
        _ => envelope.message.clone(),
    };
    let haystack = format!("{} {}", envelope.message, detail).to_lowercase();

    if haystack.contains("rate limit") {
        Err(UpstreamError::RateLimited(detail))
    } else if haystack.contains("no data found") ||
        haystack.contains("no records found") ||
        haystack.contains("no transactions found")
    {
        Err(UpstreamError::NotFound(detail))
    } else if haystack.contains("invalid") || haystack.contains("missing") {
        Err(UpstreamError::InvalidRequest(detail))
    } else {
        Err(UpstreamError::ProviderError(detail))
    }
}

#[async_trait]
impl Transport for ExplorerTransport {
    async fn call(
        &self,
        endpoint: &Endpoint,
        request: &RpcRequest,
        timeout: Duration,
    ) -> Result<Value, UpstreamError> {
        let query = self.query(request)?;

        let response = self
            .client
            .get(endpoint.url())
            .query(&query)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout
                } else {
                    UpstreamError::ConnectionFailed(sanitize_network_error(&e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::trace!(status = status.as_u16(), method = %request.method, "explorer request failed");
            return Err(UpstreamError::HttpError(status.as_u16(), status.to_string()));
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(sanitize_network_error(&e)))?;
        interpret_envelope(envelope)
    }
}
