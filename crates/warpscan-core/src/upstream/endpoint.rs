use super::token_bucket::TokenBucket;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, fmt, sync::Arc, time::Duration};
use tokio::time::Instant;

/// One configured remote node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    /// Sustained request budget. Zero disables rate limiting for this endpoint.
    #[serde(default = "default_rate_limit_per_second")]
    pub rate_limit_per_second: f64,
    /// Bucket capacity, i.e. how many requests may be issued back to back.
    #[serde(default = "default_burst")]
    pub burst: u32,
}

fn default_rate_limit_per_second() -> f64 {
    25.0
}

fn default_burst() -> u32 {
    10
}

impl EndpointConfig {
    #[must_use]
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            rate_limit_per_second: default_rate_limit_per_second(),
            burst: default_burst(),
        }
    }

    #[must_use]
    pub fn with_rate_limit(mut self, per_second: f64, burst: u32) -> Self {
        self.rate_limit_per_second = per_second;
        self.burst = burst;
        self
    }
}

/// Position of an endpoint inside its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub(crate) usize);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A remote node as seen by the dispatcher.
///
/// Identity is immutable; health and rate state live behind a private lock that only
/// [`super::pool::EndpointPool`] mutates.
pub struct Endpoint {
    id: EndpointId,
    name: Arc<str>,
    url: Arc<str>,
    pub(crate) state: Mutex<EndpointState>,
}

impl Endpoint {
    pub(crate) fn new(id: EndpointId, config: &EndpointConfig) -> Self {
        Self {
            id,
            name: Arc::from(config.name.as_str()),
            url: Arc::from(config.url.as_str()),
            state: Mutex::new(EndpointState::new(TokenBucket::new(
                config.burst,
                config.rate_limit_per_second,
            ))),
        }
    }

    #[must_use]
    pub fn id(&self) -> EndpointId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Debug for Endpoint {
    // The URL is left out: it frequently embeds an API key.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint").field("id", &self.id).field("name", &self.name).finish_non_exhaustive()
    }
}

/// Mutable health and rate state of one endpoint.
#[derive(Debug)]
pub(crate) struct EndpointState {
    /// In `[0.0, 1.0]`; starts at 1.0.
    pub(crate) health: f64,
    pub(crate) consecutive_failures: u32,
    /// Timestamps of the current run of failures, pruned to the failure window.
    pub(crate) recent_failures: VecDeque<Instant>,
    pub(crate) suspended_until: Option<Instant>,
    pub(crate) suspensions: u32,
    /// Start of the current failure-free stretch: the last transient failure, or the end of the
    /// last suspension. `suspensions` decays once this lies a full failure window in the past.
    pub(crate) quiet_since: Option<Instant>,
    /// Set when the node itself answered with a rate-limit error.
    pub(crate) backoff_until: Option<Instant>,
    pub(crate) bucket: TokenBucket,
    /// Selection sequence number of the last time this endpoint was chosen; 0 if never.
    pub(crate) last_selected: u64,
    pub(crate) last_latency: Option<Duration>,
    pub(crate) total_successes: u64,
    pub(crate) total_failures: u64,
}

impl EndpointState {
    fn new(bucket: TokenBucket) -> Self {
        Self {
            health: 1.0,
            consecutive_failures: 0,
            recent_failures: VecDeque::new(),
            suspended_until: None,
            suspensions: 0,
            quiet_since: None,
            backoff_until: None,
            bucket,
            last_selected: 0,
            last_latency: None,
            total_successes: 0,
            total_failures: 0,
        }
    }

    /// Returns the remaining suspension, clearing it once the cooldown has elapsed.
    pub(crate) fn suspension_remaining(&mut self, now: Instant) -> Option<Duration> {
        match self.suspended_until {
            Some(until) if until > now => Some(until - now),
            Some(_) => {
                self.suspended_until = None;
                None
            }
            None => None,
        }
    }

    pub(crate) fn backoff_remaining(&mut self, now: Instant) -> Option<Duration> {
        match self.backoff_until {
            Some(until) if until > now => Some(until - now),
            Some(_) => {
                self.backoff_until = None;
                None
            }
            None => None,
        }
    }
}

/// Point-in-time view of an endpoint for display.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointSnapshot {
    pub name: String,
    pub health: f64,
    pub consecutive_failures: u32,
    pub suspended_for_ms: Option<u64>,
    pub suspensions: u32,
    pub rate_limited_for_ms: Option<u64>,
    pub available_tokens: f64,
    pub last_latency_ms: Option<u64>,
    pub total_successes: u64,
    pub total_failures: u64,
}
