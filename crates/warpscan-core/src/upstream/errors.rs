use thiserror::Error;

/// Classification of JSON-RPC error objects returned by a node.
///
/// - Client errors are the caller's fault and are never retried
/// - Provider errors are the node's fault and are retried elsewhere
/// - Rate limits are retried elsewhere and back the node off
/// - Execution errors (reverts, nonce problems) are forwarded as permanent
/// - Missing data ("header not found", "unknown block") is a normal negative answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcErrorCategory {
    ClientError,
    ProviderError,
    RateLimit,
    /// The node could not parse our payload.
    ParseError,
    ExecutionError,
    NotFound,
}

impl RpcErrorCategory {
    /// Classifies a JSON-RPC error code and message.
    ///
    /// Standard codes:
    /// - -32700: Parse error
    /// - -32600 / -32601 / -32602: Invalid request, method not found, invalid params
    /// - -32603: Internal error
    /// - -32005: Limit exceeded
    /// - -32000 to -32099: Server errors, disambiguated by message
    #[must_use]
    pub fn from_code_and_message(code: i32, message: &str) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32602..=-32600 => Self::ClientError,
            -32603 => Self::ProviderError,
            -32005 => Self::RateLimit,
            -32099..=-32000 => {
                let message_lower = message.to_lowercase();
                if message_lower.contains("execution reverted") ||
                    message_lower.contains("out of gas") ||
                    message_lower.contains("revert") ||
                    message_lower.contains("insufficient funds") ||
                    message_lower.contains("nonce too low") ||
                    message_lower.contains("gas too low") ||
                    message_lower.contains("already known")
                {
                    Self::ExecutionError
                } else if message_lower.contains("not found") ||
                    message_lower.contains("unknown block")
                {
                    Self::NotFound
                } else if message_lower.contains("rate limit") ||
                    message_lower.contains("too many requests")
                {
                    Self::RateLimit
                } else {
                    Self::ProviderError
                }
            }
            _ => Self::ProviderError,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientError => "client_error",
            Self::ProviderError => "provider_error",
            Self::RateLimit => "rate_limit",
            Self::ParseError => "parse_error",
            Self::ExecutionError => "execution_error",
            Self::NotFound => "not_found",
        }
    }
}

/// How the dispatcher reacts to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Retry on a different endpoint after backoff.
    Transient,
    /// Retry on a different endpoint; the offending endpoint is backed off longer.
    RateLimited,
    /// Surface immediately.
    Permanent,
    /// Surface immediately as a negative result.
    NotFound,
}

impl ErrorClass {
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }
}

/// Raw failure of a single attempt against one endpoint.
///
/// These never reach callers of the core; the dispatcher folds them into
/// [`crate::CoreError`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum UpstreamError {
    #[error("request timeout")]
    Timeout,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Non-2xx HTTP status with the response body or reason.
    #[error("http error {0}: {1}")]
    HttpError(u16, String),

    #[error("rpc error {0}: {1}")]
    RpcError(i32, String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The body was not a well-formed response for the request.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The service answered but reported a failure on its side.
    #[error("provider error: {0}")]
    ProviderError(String),

    /// Service-level rate limit signalled in the response body rather than the status code.
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The request could not be expressed for this transport.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl UpstreamError {
    /// Returns the RPC error category if this is a JSON-RPC error object.
    #[must_use]
    pub fn rpc_category(&self) -> Option<RpcErrorCategory> {
        match self {
            Self::RpcError(code, message) => {
                Some(RpcErrorCategory::from_code_and_message(*code, message))
            }
            _ => None,
        }
    }

    /// Maps the failure onto exactly one [`ErrorClass`].
    ///
    /// Malformed payloads in either direction are permanent and never count against the node.
    #[must_use]
    pub fn classify(&self) -> ErrorClass {
        match self {
            Self::Timeout | Self::ConnectionFailed(_) | Self::Network(_) | Self::ProviderError(_) => {
                ErrorClass::Transient
            }
            Self::InvalidResponse(_) => ErrorClass::Permanent,
            Self::HttpError(status, _) => match *status {
                429 => ErrorClass::RateLimited,
                408 | 500..=599 => ErrorClass::Transient,
                400..=499 => ErrorClass::Permanent,
                _ => ErrorClass::Transient,
            },
            Self::RpcError(..) => match self.rpc_category() {
                Some(RpcErrorCategory::RateLimit) => ErrorClass::RateLimited,
                Some(
                    RpcErrorCategory::ClientError |
                    RpcErrorCategory::ParseError |
                    RpcErrorCategory::ExecutionError,
                ) => ErrorClass::Permanent,
                Some(RpcErrorCategory::NotFound) => ErrorClass::NotFound,
                Some(RpcErrorCategory::ProviderError) | None => ErrorClass::Transient,
            },
            Self::RateLimited(_) => ErrorClass::RateLimited,
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::InvalidRequest(_) => ErrorClass::Permanent,
        }
    }
}

/// Strips URLs and credentials out of reqwest errors before they are logged or surfaced.
///
/// Endpoint URLs routinely embed API keys in the path or query string.
#[must_use]
pub fn sanitize_network_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "request timed out".to_string()
    } else if error.is_connect() {
        "connection refused or unreachable".to_string()
    } else if error.is_body() || error.is_decode() {
        "failed to read response body".to_string()
    } else if error.is_request() {
        "failed to send request".to_string()
    } else {
        let message = error.to_string();
        match error.url() {
            Some(url) => message.replace(url.as_str(), "<endpoint>"),
            None => message,
        }
    }
}
