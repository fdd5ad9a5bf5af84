use super::{
    endpoint::Endpoint,
    errors::{sanitize_network_error, UpstreamError},
    request::RpcRequest,
    transport::Transport,
};
use crate::types::{JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde_json::{json, Value};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

const MAX_ERROR_BODY: usize = 256;

/// JSON-RPC over HTTP POST.
pub struct HttpTransport {
    client: Client,
    next_id: AtomicU64,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns [`UpstreamError::Network`] if the reqwest client fails to build.
    pub fn new() -> Result<Self, UpstreamError> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(16)
            .connect_timeout(Duration::from_secs(5))
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("warpscan/", env!("CARGO_PKG_VERSION")))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                UpstreamError::Network(e)
            })?;

        Ok(Self { client, next_id: AtomicU64::new(1) })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(
        &self,
        endpoint: &Endpoint,
        request: &RpcRequest,
        timeout: Duration,
    ) -> Result<Value, UpstreamError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = JsonRpcRequest::new(request.method.as_ref(), request.params.clone(), json!(id));

        let response = self
            .client
            .post(endpoint.url())
            .json(&body)
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
            let mut text = response.text().await.unwrap_or_default();
            if text.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                text.truncate(cut);
                text.push_str("... (truncated)");
            }
            tracing::trace!(upstream = %endpoint.name(), status = status.as_u16(), "http request failed");
            return Err(UpstreamError::HttpError(status.as_u16(), text));
        }

        let parsed: JsonRpcResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout
            } else {
                UpstreamError::InvalidResponse(sanitize_network_error(&e))
            }
        })?;

        if let Some(error) = parsed.error {
            return Err(UpstreamError::RpcError(error.code, error.message));
        }
        Ok(parsed.result.unwrap_or(Value::Null))
    }
}
