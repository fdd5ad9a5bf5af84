use serde_json::Value;
use std::{borrow::Cow, time::Duration};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One logical call, independent of which endpoint ends up serving it.
///
/// Reads are idempotent and may be retried across endpoints. A non-idempotent request (a
/// pre-signed transaction being forwarded) gets exactly one attempt.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    pub method: Cow<'static, str>,
    pub params: Value,
    pub idempotent: bool,
    /// Absolute deadline for the whole retry sequence.
    pub deadline: Option<Instant>,
    pub cancel: CancellationToken,
}

impl RpcRequest {
    #[must_use]
    pub fn read(method: impl Into<Cow<'static, str>>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
            idempotent: true,
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    /// A call with side effects on the node. Never retried.
    #[must_use]
    pub fn submit(method: impl Into<Cow<'static, str>>, params: Value) -> Self {
        Self { idempotent: false, ..Self::read(method, params) }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Time left before the deadline; `None` when no deadline is set.
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(now))
    }
}
