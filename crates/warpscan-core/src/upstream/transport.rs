use super::{endpoint::Endpoint, errors::UpstreamError, request::RpcRequest};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Issues a single attempt of a request against one endpoint.
///
/// Implementations do not retry; retry, failover and backoff belong to the dispatcher.
#[async_trait]
pub trait Transport: Send + Sync {
    /// # Errors
    ///
    /// Returns the raw [`UpstreamError`] of this attempt.
    async fn call(
        &self,
        endpoint: &Endpoint,
        request: &RpcRequest,
        timeout: Duration,
    ) -> Result<Value, UpstreamError>;
}
