//! Caller-facing error taxonomy.
//!
//! Every public operation of the core returns [`CoreError`]; raw transport failures are folded
//! into it by the dispatcher so a consumer never sees a network error directly. The type is
//! `Clone` because one single-flight failure is fanned out to every waiter on that key.

use crate::upstream::errors::{ErrorClass, UpstreamError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Network trouble that outlived the retry budget of a non-retried request.
    #[error("transient upstream failure: {0}")]
    Transient(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Invalid request or method; never retried.
    #[error("request rejected: {0}")]
    Permanent(String),

    /// The entity does not exist. Typed query methods surface this as `Ok(None)`.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("all endpoints exhausted after {attempts} attempt(s): {last_error}")]
    EndpointsExhausted { attempts: u32, last_error: String },

    #[error("request cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("unrecognized query: {0}")]
    Unrecognized(String),

    /// A response decoded as JSON but not into the expected record shape.
    #[error("failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },
}

impl CoreError {
    /// Folds a raw attempt failure into the caller taxonomy.
    #[must_use]
    pub fn from_upstream(error: &UpstreamError) -> Self {
        let message = error.to_string();
        match error.classify() {
            ErrorClass::Transient => Self::Transient(message),
            ErrorClass::RateLimited => Self::RateLimited(message),
            ErrorClass::Permanent => Self::Permanent(message),
            ErrorClass::NotFound => Self::NotFound(message),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Static label for logs and statistics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient(_) => "transient",
            Self::RateLimited(_) => "rate_limited",
            Self::Permanent(_) => "permanent",
            Self::NotFound(_) => "not_found",
            Self::EndpointsExhausted { .. } => "endpoints_exhausted",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Unrecognized(_) => "unrecognized",
            Self::Decode { .. } => "decode",
        }
    }

    pub(crate) fn decode(what: &'static str, error: &serde_json::Error) -> Self {
        Self::Decode { what, reason: error.to_string() }
    }
}

/// Converts a lookup result into the "normal negative result" form.
///
/// # Errors
///
/// Returns every error except [`CoreError::NotFound`], which becomes `Ok(None)`.
pub fn not_found_as_none<T>(result: Result<T, CoreError>) -> Result<Option<T>, CoreError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(CoreError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
