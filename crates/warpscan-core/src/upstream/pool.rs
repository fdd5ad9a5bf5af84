//! Endpoint pool: health scoring, suspension and rate budgets.
//!
//! The pool is the only writer of endpoint state. Selection ranks endpoints by health and
//! breaks ties by least-recently-selected, which degenerates to round robin across equally
//! healthy nodes. A rate budget that is temporarily empty makes an endpoint unavailable for
//! selection without touching its health, so throttling never triggers failover suspension.

use super::endpoint::{Endpoint, EndpointConfig, EndpointId, EndpointSnapshot};
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Health and suspension tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Failures in a row (inside the window) that suspend an endpoint.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_failure_window_secs")]
    pub failure_window_secs: u64,
    /// First suspension length; doubles with every further suspension.
    #[serde(default = "default_cooldown_base_secs")]
    pub cooldown_base_secs: u64,
    #[serde(default = "default_cooldown_max_secs")]
    pub cooldown_max_secs: u64,
    #[serde(default = "default_health_success_step")]
    pub health_success_step: f64,
    #[serde(default = "default_health_failure_step")]
    pub health_failure_step: f64,
}

fn default_max_consecutive_failures() -> u32 {
    3
}

fn default_failure_window_secs() -> u64 {
    30
}

fn default_cooldown_base_secs() -> u64 {
    5
}

fn default_cooldown_max_secs() -> u64 {
    300
}

fn default_health_success_step() -> f64 {
    0.1
}

fn default_health_failure_step() -> f64 {
    0.25
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: default_max_consecutive_failures(),
            failure_window_secs: default_failure_window_secs(),
            cooldown_base_secs: default_cooldown_base_secs(),
            cooldown_max_secs: default_cooldown_max_secs(),
            health_success_step: default_health_success_step(),
            health_failure_step: default_health_failure_step(),
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn failure_window(&self) -> Duration {
        Duration::from_secs(self.failure_window_secs)
    }

    /// Cooldown for the next suspension: `base * 2^suspensions`, capped.
    #[must_use]
    pub fn cooldown_for(&self, suspensions: u32) -> Duration {
        let factor = 1u64 << suspensions.min(20);
        let secs = self.cooldown_base_secs.saturating_mul(factor).min(self.cooldown_max_secs);
        Duration::from_secs(secs)
    }
}

/// Why an attempt failed, from the pool's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeout, connection failure, 5xx. Counts towards suspension.
    Transient,
    /// The node refused because of its own rate limit. Backs the endpoint off for
    /// `retry_after` without counting as a health failure.
    RateLimited { retry_after: Duration },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SelectError {
    #[error("endpoint pool is empty")]
    Empty,
    #[error("no endpoint available ({suspended} suspended, {excluded} already tried)")]
    Exhausted {
        suspended: usize,
        excluded: usize,
        /// Earliest time a rate-limited endpoint will have budget again, if any was skipped
        /// only for lack of budget.
        retry_after: Option<Duration>,
    },
}

pub struct EndpointPool {
    endpoints: Vec<Arc<Endpoint>>,
    config: PoolConfig,
    selections: AtomicU64,
}

impl EndpointPool {
    #[must_use]
    pub fn new(endpoints: &[EndpointConfig], config: PoolConfig) -> Self {
        let endpoints = endpoints
            .iter()
            .enumerate()
            .map(|(index, cfg)| Arc::new(Endpoint::new(EndpointId(index), cfg)))
            .collect();
        Self { endpoints, config, selections: AtomicU64::new(0) }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    #[must_use]
    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Picks the best available endpoint and consumes one rate token from it.
    ///
    /// # Errors
    ///
    /// Returns [`SelectError`] when every endpoint is suspended or out of budget.
    pub fn select(&self) -> Result<Arc<Endpoint>, SelectError> {
        self.select_excluding(&[])
    }

    /// Like [`Self::select`], skipping endpoints already tried for the current request.
    ///
    /// # Errors
    ///
    /// Returns [`SelectError`] when no endpoint outside `tried` qualifies.
    pub fn select_excluding(&self, tried: &[EndpointId]) -> Result<Arc<Endpoint>, SelectError> {
        if self.endpoints.is_empty() {
            return Err(SelectError::Empty);
        }

        let now = Instant::now();
        let mut suspended = 0usize;
        let mut candidates: Vec<(f64, u64, &Arc<Endpoint>)> = Vec::with_capacity(self.endpoints.len());

        for endpoint in &self.endpoints {
            if tried.contains(&endpoint.id()) {
                continue;
            }
            let mut state = endpoint.state.lock();
            if state.suspension_remaining(now).is_some() {
                suspended += 1;
                continue;
            }
            candidates.push((state.health, state.last_selected, endpoint));
        }

        candidates.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut retry_after: Option<Duration> = None;
        for (_, _, endpoint) in candidates {
            let mut state = endpoint.state.lock();
            if state.suspension_remaining(now).is_some() {
                suspended += 1;
                continue;
            }
            if let Some(wait) = state.backoff_remaining(now) {
                retry_after = Some(retry_after.map_or(wait, |r| r.min(wait)));
                continue;
            }
            if state.bucket.try_acquire(now) {
                state.last_selected = self.selections.fetch_add(1, Ordering::Relaxed) + 1;
                return Ok(Arc::clone(endpoint));
            }
            let wait = state.bucket.time_until_ready(now);
            retry_after = Some(retry_after.map_or(wait, |r| r.min(wait)));
            debug!(upstream = %endpoint.name(), "endpoint rate budget empty, skipping");
        }

        Err(SelectError::Exhausted { suspended, excluded: tried.len(), retry_after })
    }

    /// Raises health (bounded at 1.0) and resets the failure run.
    ///
    /// The suspension count survives isolated successes so a flapping endpoint keeps
    /// escalating; it only resets after a full failure window without trouble.
    pub fn report_success(&self, endpoint: &Endpoint, latency: Duration) {
        let now = Instant::now();
        let window = self.config.failure_window();
        let mut state = endpoint.state.lock();
        state.health = (state.health + self.config.health_success_step).min(1.0);
        state.consecutive_failures = 0;
        state.recent_failures.clear();
        if state.suspensions > 0 &&
            state.quiet_since.is_some_and(|since| now.saturating_duration_since(since) >= window)
        {
            debug!(upstream = %endpoint.name(), suspensions = state.suspensions, "endpoint stable again, cooldown reset");
            state.suspensions = 0;
            state.quiet_since = None;
        }
        state.last_latency = Some(latency);
        state.total_successes += 1;
    }

    /// Lowers health and suspends the endpoint once the failure run reaches the threshold.
    pub fn report_failure(&self, endpoint: &Endpoint, kind: FailureKind) {
        let now = Instant::now();
        let mut state = endpoint.state.lock();
        state.total_failures += 1;

        match kind {
            FailureKind::RateLimited { retry_after } => {
                state.backoff_until = Some(now + retry_after);
                state.bucket.drain(now);
                debug!(
                    upstream = %endpoint.name(),
                    backoff_ms = retry_after.as_millis(),
                    "endpoint rate limited, backing off"
                );
            }
            FailureKind::Transient => {
                state.health = (state.health - self.config.health_failure_step).max(0.0);
                state.consecutive_failures += 1;
                state.quiet_since = Some(now);

                let window = self.config.failure_window();
                state.recent_failures.push_back(now);
                while state
                    .recent_failures
                    .front()
                    .is_some_and(|t| now.saturating_duration_since(*t) > window)
                {
                    state.recent_failures.pop_front();
                }

                let threshold = self.config.max_consecutive_failures.max(1) as usize;
                if state.recent_failures.len() >= threshold {
                    let cooldown = self.config.cooldown_for(state.suspensions);
                    state.suspended_until = Some(now + cooldown);
                    state.quiet_since = Some(now + cooldown);
                    state.suspensions += 1;
                    state.recent_failures.clear();
                    warn!(
                        upstream = %endpoint.name(),
                        cooldown_secs = cooldown.as_secs(),
                        suspensions = state.suspensions,
                        health = state.health,
                        "endpoint suspended after repeated failures"
                    );
                }
            }
        }
    }

    /// Number of endpoints not currently suspended.
    #[must_use]
    pub fn available_count(&self) -> usize {
        let now = Instant::now();
        self.endpoints
            .iter()
            .filter(|e| e.state.lock().suspension_remaining(now).is_none())
            .count()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<EndpointSnapshot> {
        let now = Instant::now();
        self.endpoints
            .iter()
            .map(|endpoint| {
                let mut state = endpoint.state.lock();
                let suspended = state.suspension_remaining(now);
                let backoff = state.backoff_remaining(now);
                EndpointSnapshot {
                    name: endpoint.name().to_string(),
                    health: state.health,
                    consecutive_failures: state.consecutive_failures,
                    suspended_for_ms: suspended.map(|d| d.as_millis() as u64),
                    suspensions: state.suspensions,
                    rate_limited_for_ms: backoff.map(|d| d.as_millis() as u64),
                    available_tokens: state.bucket.available(now),
                    last_latency_ms: state.last_latency.map(|d| d.as_millis() as u64),
                    total_successes: state.total_successes,
                    total_failures: state.total_failures,
                }
            })
            .collect()
    }

    /// Logs the pool state once at startup.
    pub fn log_summary(&self) {
        for endpoint in &self.endpoints {
            info!(upstream = %endpoint.name(), id = %endpoint.id(), "endpoint registered");
        }
    }
}
