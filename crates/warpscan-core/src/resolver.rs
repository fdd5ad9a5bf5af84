//! Turns one raw search token into a typed lookup.
//!
//! Shapes are checked in a fixed order: the `latest` tag, decimal height, 20-byte hex address,
//! 32-byte hex hash, dotted name. Short hex strings are rejected rather than read as heights.
//! A 32-byte hash is ambiguous; the transaction interpretation is tried first and
//! block-by-hash only when the transaction lookup says not-found. Any other failure stops the
//! sequence so a flaky node is never mistaken for a miss.

use crate::{
    error::CoreError,
    explorer::Explorer,
    types::{AddressInfo, BlockHeader, TransactionRecord},
    utils::is_prefixed_hex,
};
use async_trait::async_trait;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    /// The current head block.
    Latest,
    BlockNumber(u64),
    Address(String),
    /// Transaction hash or block hash.
    Hash(String),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolved {
    Block(BlockHeader),
    Transaction(TransactionRecord),
    Address {
        #[serde(flatten)]
        info: AddressInfo,
        /// The name the address was resolved from, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

/// External name service (ENS or similar).
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Returns the address a name points at, `None` if it is not registered.
    async fn resolve_name(&self, name: &str) -> Result<Option<String>, CoreError>;
}

fn is_name(input: &str) -> bool {
    input.contains('.') &&
        !input.starts_with('.') &&
        !input.ends_with('.') &&
        input.chars().all(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

/// Classifies `input` by shape alone.
///
/// # Errors
///
/// Returns [`CoreError::Unrecognized`] for anything that matches no shape, including decimal
/// strings too large for a height.
pub fn classify(input: &str) -> Result<QueryKind, CoreError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CoreError::Unrecognized("empty query".into()));
    }
    if input.eq_ignore_ascii_case("latest") {
        return Ok(QueryKind::Latest);
    }
    if input.bytes().all(|b| b.is_ascii_digit()) {
        return input
            .parse()
            .map(QueryKind::BlockNumber)
            .map_err(|_| CoreError::Unrecognized(format!("block number out of range: {input}")));
    }
    if is_prefixed_hex(input, 40) {
        return Ok(QueryKind::Address(input.to_lowercase()));
    }
    if is_prefixed_hex(input, 64) {
        return Ok(QueryKind::Hash(input.to_lowercase()));
    }
    if is_name(input) {
        return Ok(QueryKind::Name(input.to_lowercase()));
    }
    Err(CoreError::Unrecognized(input.to_string()))
}

pub struct Resolver {
    explorer: Arc<Explorer>,
    names: Option<Arc<dyn NameResolver>>,
    deadline: Duration,
}

impl Resolver {
    #[must_use]
    pub fn new(explorer: Arc<Explorer>, deadline: Duration) -> Self {
        Self { explorer, names: None, deadline }
    }

    #[must_use]
    pub fn with_name_resolver(mut self, names: Arc<dyn NameResolver>) -> Self {
        self.names = Some(names);
        self
    }

    /// Classifies `input` and runs its candidate lookups under one overall deadline.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Unrecognized`] when no shape matches or a name does not resolve
    /// - [`CoreError::NotFound`] when every candidate came back empty
    /// - [`CoreError::DeadlineExceeded`] when the deadline elapses first
    /// - [`CoreError::Cancelled`] when `cancel` fires
    /// - any other error from the first candidate that failed
    pub async fn resolve(&self, input: &str, cancel: &CancellationToken) -> Result<Resolved, CoreError> {
        let query = classify(input)?;
        let attempt = cancel.child_token();
        match tokio::time::timeout(self.deadline, self.lookup(query, &attempt)).await {
            Ok(result) => result,
            Err(_) => {
                attempt.cancel();
                debug!(input = %input.trim(), deadline_ms = self.deadline.as_millis(), "query deadline exceeded");
                Err(CoreError::DeadlineExceeded)
            }
        }
    }

    async fn lookup(&self, query: QueryKind, cancel: &CancellationToken) -> Result<Resolved, CoreError> {
        match query {
            QueryKind::Latest => self.explorer.latest_block(cancel).await.map(Resolved::Block),
            QueryKind::BlockNumber(number) => self
                .explorer
                .block_by_number(number, cancel)
                .await?
                .map(Resolved::Block)
                .ok_or_else(|| CoreError::NotFound(format!("block {number}"))),
            QueryKind::Address(address) => {
                let info = self.explorer.address_info(&address, cancel).await?;
                Ok(Resolved::Address { info, name: None })
            }
            QueryKind::Hash(hash) => {
                if let Some(tx) = self.explorer.transaction(&hash, cancel).await? {
                    return Ok(Resolved::Transaction(tx));
                }
                debug!(hash = %hash, "no transaction with this hash, trying block");
                self.explorer
                    .block_by_hash(&hash, cancel)
                    .await?
                    .map(Resolved::Block)
                    .ok_or_else(|| CoreError::NotFound(format!("no transaction or block with hash {hash}")))
            }
            QueryKind::Name(name) => {
                let Some(names) = &self.names else {
                    return Err(CoreError::Unrecognized(format!("{name} (no name service configured)")));
                };
                let Some(address) = names.resolve_name(&name).await? else {
                    return Err(CoreError::Unrecognized(format!("{name} does not resolve")));
                };
                let info = self.explorer.address_info(&address, cancel).await?;
                Ok(Resolved::Address { info, name: Some(name) })
            }
        }
    }
}
