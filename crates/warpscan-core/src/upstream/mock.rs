//! Scripted in-process transport for deterministic tests.

use super::{endpoint::Endpoint, errors::UpstreamError, request::RpcRequest, transport::Transport};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::{sync::Arc, time::Duration};

type Handler = dyn Fn(&str, &RpcRequest) -> Result<Value, UpstreamError> + Send + Sync;

/// A call observed by [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub endpoint: String,
    pub method: String,
    pub params: Value,
}

/// Transport answering from a closure of `(endpoint name, request)`.
///
/// ```ignore
/// let transport = MockTransport::new(|endpoint, req| match endpoint {
///     "a" => Err(UpstreamError::Timeout),
///     _ => Ok(json!("0x10")),
/// });
/// ```
pub struct MockTransport {
    handler: Box<Handler>,
    latency: Duration,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &RpcRequest) -> Result<Value, UpstreamError> + Send + Sync + 'static,
    {
        Self { handler: Box::new(handler), latency: Duration::ZERO, calls: Arc::default() }
    }

    /// Delays every answer, which keeps calls in flight long enough to observe coalescing.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    #[must_use]
    pub fn calls_to(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.method == method).count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn call(
        &self,
        endpoint: &Endpoint,
        request: &RpcRequest,
        timeout: Duration,
    ) -> Result<Value, UpstreamError> {
        self.calls.lock().push(RecordedCall {
            endpoint: endpoint.name().to_string(),
            method: request.method.to_string(),
            params: request.params.clone(),
        });
        if !self.latency.is_zero() {
            if self.latency > timeout {
                tokio::time::sleep(timeout).await;
                return Err(UpstreamError::Timeout);
            }
            tokio::time::sleep(self.latency).await;
        }
        (self.handler)(endpoint.name(), request)
    }
}
