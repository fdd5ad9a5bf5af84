//! Request dispatcher: one logical call, many possible attempts.
//!
//! Every attempt goes to an endpoint the current request has not tried yet. Outcomes are
//! classified and reported back to the pool:
//!
//! - success: report success, return the value
//! - transient: report failure, back off with jitter, try another endpoint
//! - rate limited: the pool backs that endpoint off, then as transient
//! - permanent / not found: return immediately
//!
//! The request's cancellation token and deadline are honoured at every suspension point
//! (in-flight permit, attempt, backoff sleep).

use super::{
    endpoint::EndpointId,
    errors::{ErrorClass, UpstreamError},
    pool::{EndpointPool, FailureKind, SelectError},
    request::RpcRequest,
    transport::Transport,
};
use crate::error::CoreError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::Semaphore, time::Instant};
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatcherConfig {
    /// Upper bound for a single attempt.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Total attempts per logical request, across distinct endpoints.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Fraction of the delay randomised around its midpoint, in `[0, 1]`.
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    /// How long an endpoint that answered "rate limited" is kept out of selection.
    #[serde(default = "default_rate_limit_backoff_ms")]
    pub rate_limit_backoff_ms: u64,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    4
}

fn default_backoff_base_ms() -> u64 {
    100
}

fn default_backoff_max_ms() -> u64 {
    2_000
}

fn default_jitter_factor() -> f64 {
    0.25
}

fn default_rate_limit_backoff_ms() -> u64 {
    1_000
}

fn default_max_in_flight() -> usize {
    64
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            jitter_factor: default_jitter_factor(),
            rate_limit_backoff_ms: default_rate_limit_backoff_ms(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl DispatcherConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_millis(self.rate_limit_backoff_ms)
    }

    /// Jittered exponential delay before attempt `attempt + 1`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        let base_delay = self.backoff_base_ms.saturating_mul(1u64 << exponent);
        let capped_delay = base_delay.min(self.backoff_max_ms);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let jitter_range = (capped_delay as f64 * self.jitter_factor.clamp(0.0, 1.0)) as u64;
        let jitter_offset =
            if jitter_range > 0 { rand::rng().random_range(0..jitter_range) } else { 0 };

        Duration::from_millis(capped_delay.saturating_sub(jitter_range / 2) + jitter_offset)
    }
}

/// Running totals across every request this dispatcher has served.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    requests: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    exhausted: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub requests: u64,
    pub attempts: u64,
    pub retries: u64,
    pub exhausted: u64,
}

impl DispatcherStats {
    #[must_use]
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

pub struct Dispatcher {
    pool: Arc<EndpointPool>,
    transport: Arc<dyn Transport>,
    config: DispatcherConfig,
    in_flight: Semaphore,
    stats: DispatcherStats,
}

impl Dispatcher {
    #[must_use]
    pub fn new(pool: Arc<EndpointPool>, transport: Arc<dyn Transport>, config: DispatcherConfig) -> Self {
        let permits = config.max_in_flight.max(1);
        Self { pool, transport, config, in_flight: Semaphore::new(permits), stats: DispatcherStats::default() }
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }

    #[must_use]
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    #[must_use]
    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.stats.snapshot()
    }

    /// Executes `request` with failover across the pool.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Permanent`] / [`CoreError::NotFound`] as soon as a node says so
    /// - [`CoreError::EndpointsExhausted`] once the attempt budget or the pool runs out
    /// - [`CoreError::Cancelled`] / [`CoreError::DeadlineExceeded`] from the request itself
    /// - for non-idempotent requests, the classified error of the single attempt
    pub async fn execute(&self, request: &RpcRequest) -> Result<Value, CoreError> {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);

        let _permit = self
            .guarded(request, self.in_flight.acquire())
            .await?
            .map_err(|_| CoreError::Permanent("dispatcher is shut down".into()))?;

        let max_attempts = if request.idempotent { self.config.max_attempts.max(1) } else { 1 };
        let mut tried: Vec<EndpointId> = Vec::with_capacity(max_attempts as usize);
        let mut attempts = 0u32;
        let mut budget_waits = 0u32;
        let mut last_error = String::new();

        while attempts < max_attempts {
            let endpoint = match self.pool.select_excluding(&tried) {
                Ok(endpoint) => endpoint,
                Err(SelectError::Exhausted { retry_after: Some(wait), .. })
                    if wait <= Duration::from_millis(self.config.backoff_max_ms) &&
                        budget_waits < max_attempts * 4 =>
                {
                    budget_waits += 1;
                    trace!(method = %request.method, wait_ms = wait.as_millis(), "waiting for rate budget");
                    self.guarded(request, tokio::time::sleep(wait)).await?;
                    continue;
                }
                Err(e) => {
                    if attempts == 0 {
                        last_error = e.to_string();
                    }
                    break;
                }
            };

            attempts += 1;
            tried.push(endpoint.id());
            self.stats.attempts.fetch_add(1, Ordering::Relaxed);
            if attempts > 1 {
                self.stats.retries.fetch_add(1, Ordering::Relaxed);
            }

            let now = Instant::now();
            let timeout = request
                .remaining(now)
                .map_or(self.config.request_timeout(), |r| r.min(self.config.request_timeout()));

            let outcome = self
                .guarded(request, async {
                    match tokio::time::timeout(timeout, self.transport.call(&endpoint, request, timeout)).await {
                        Ok(result) => result,
                        Err(_) => Err(UpstreamError::Timeout),
                    }
                })
                .await?;

            let error = match outcome {
                Ok(value) => {
                    self.pool.report_success(&endpoint, now.elapsed());
                    if attempts > 1 {
                        debug!(method = %request.method, upstream = %endpoint.name(), attempts, "request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            match error.classify() {
                ErrorClass::Permanent => {
                    debug!(method = %request.method, upstream = %endpoint.name(), error = %error, "permanent error");
                    return Err(CoreError::from_upstream(&error));
                }
                ErrorClass::NotFound => {
                    // The node answered correctly; absence is not its fault.
                    self.pool.report_success(&endpoint, now.elapsed());
                    return Err(CoreError::from_upstream(&error));
                }
                ErrorClass::Transient => {
                    self.pool.report_failure(&endpoint, FailureKind::Transient);
                }
                ErrorClass::RateLimited => {
                    self.pool.report_failure(
                        &endpoint,
                        FailureKind::RateLimited { retry_after: self.config.rate_limit_backoff() },
                    );
                }
            }

            debug!(
                method = %request.method,
                upstream = %endpoint.name(),
                attempt = attempts,
                max_attempts,
                error = %error,
                "attempt failed"
            );

            if !request.idempotent {
                return Err(CoreError::from_upstream(&error));
            }
            last_error = error.to_string();

            if attempts < max_attempts {
                let delay = self.config.backoff_delay(attempts);
                self.guarded(request, tokio::time::sleep(delay)).await?;
            }
        }

        self.stats.exhausted.fetch_add(1, Ordering::Relaxed);
        warn!(method = %request.method, attempts, last_error = %last_error, "all endpoints exhausted");
        Err(CoreError::EndpointsExhausted { attempts, last_error })
    }

    /// Runs `fut` unless the request is cancelled or its deadline passes first.
    async fn guarded<F: Future>(&self, request: &RpcRequest, fut: F) -> Result<F::Output, CoreError> {
        tokio::select! {
            biased;
            () = request.cancel.cancelled() => Err(CoreError::Cancelled),
            () = sleep_until_deadline(request.deadline) => Err(CoreError::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::{endpoint::EndpointConfig, mock::MockTransport, pool::PoolConfig};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio_util::sync::CancellationToken;

    fn dispatcher(names: &[&str], transport: Arc<MockTransport>, config: DispatcherConfig) -> Dispatcher {
        let endpoints: Vec<_> = names
            .iter()
            .map(|n| EndpointConfig::new(*n, format!("http://{n}")).with_rate_limit(0.0, 1))
            .collect();
        let pool = Arc::new(EndpointPool::new(&endpoints, PoolConfig::default()));
        Dispatcher::new(pool, transport, config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_fails_over_to_third_endpoint() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        let transport = Arc::new(MockTransport::new(move |_, _| {
            if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(UpstreamError::ConnectionFailed("reset".into()))
            } else {
                Ok(json!("0x10"))
            }
        }));
        let dispatcher = dispatcher(&["a", "b", "c"], Arc::clone(&transport), DispatcherConfig::default());

        let value = dispatcher.execute(&RpcRequest::read("eth_blockNumber", json!([]))).await.unwrap();
        assert_eq!(value, json!("0x10"));

        let endpoints: Vec<String> = transport.calls().into_iter().map(|c| c.endpoint).collect();
        assert_eq!(endpoints, ["a", "b", "c"]);

        let snapshot = dispatcher.pool().snapshot();
        let failures: u64 = snapshot.iter().map(|s| s.total_failures).sum();
        let successes: u64 = snapshot.iter().map(|s| s.total_successes).sum();
        assert_eq!(failures, 2);
        assert_eq!(successes, 1);
        assert_eq!(snapshot[2].total_successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_bounded_by_max_attempts() {
        let transport = Arc::new(MockTransport::new(|_, _| Err(UpstreamError::HttpError(502, "bad gateway".into()))));
        let config = DispatcherConfig { max_attempts: 3, ..DispatcherConfig::default() };
        let dispatcher = dispatcher(&["a", "b", "c", "d", "e"], Arc::clone(&transport), config);

        let err = dispatcher.execute(&RpcRequest::read("eth_chainId", json!([]))).await.unwrap_err();
        assert!(matches!(err, CoreError::EndpointsExhausted { attempts: 3, .. }));
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_never_repeats_an_endpoint() {
        let transport = Arc::new(MockTransport::new(|_, _| Err(UpstreamError::Timeout)));
        let dispatcher = dispatcher(&["a", "b"], Arc::clone(&transport), DispatcherConfig::default());

        let err = dispatcher.execute(&RpcRequest::read("eth_chainId", json!([]))).await.unwrap_err();
        assert!(matches!(err, CoreError::EndpointsExhausted { attempts: 2, .. }));
        let endpoints: Vec<String> = transport.calls().into_iter().map(|c| c.endpoint).collect();
        assert_eq!(endpoints, ["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let transport =
            Arc::new(MockTransport::new(|_, _| Err(UpstreamError::RpcError(-32601, "method not found".into()))));
        let dispatcher = dispatcher(&["a", "b", "c"], Arc::clone(&transport), DispatcherConfig::default());

        let err = dispatcher.execute(&RpcRequest::read("eth_nope", json!([]))).await.unwrap_err();
        assert!(matches!(err, CoreError::Permanent(_)));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payloads_fail_once_without_penalty() {
        let transport = Arc::new(MockTransport::new(|endpoint, _| match endpoint {
            "a" => Err(UpstreamError::RpcError(-32700, "Parse error".into())),
            _ => Err(UpstreamError::InvalidResponse("missing result".into())),
        }));
        let dispatcher = dispatcher(&["a", "b"], Arc::clone(&transport), DispatcherConfig::default());

        let err = dispatcher.execute(&RpcRequest::read("eth_chainId", json!([]))).await.unwrap_err();
        assert!(matches!(err, CoreError::Permanent(_)), "got {err:?}");
        assert_eq!(transport.call_count(), 1);
        assert!(dispatcher.pool().snapshot().iter().all(|e| e.total_failures == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_not_retried_and_not_penalized() {
        let transport =
            Arc::new(MockTransport::new(|_, _| Err(UpstreamError::RpcError(-32000, "header not found".into()))));
        let dispatcher = dispatcher(&["a", "b"], Arc::clone(&transport), DispatcherConfig::default());

        let err = dispatcher.execute(&RpcRequest::read("eth_getBlockByNumber", json!([]))).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(transport.call_count(), 1);
        assert_eq!(dispatcher.pool().snapshot()[0].total_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_endpoint_backed_off() {
        let transport = Arc::new(MockTransport::new(|endpoint, _| match endpoint {
            "a" => Err(UpstreamError::HttpError(429, "slow down".into())),
            _ => Ok(json!("0x1")),
        }));
        let dispatcher = dispatcher(&["a", "b"], Arc::clone(&transport), DispatcherConfig::default());

        assert_eq!(dispatcher.execute(&RpcRequest::read("eth_chainId", json!([]))).await.unwrap(), json!("0x1"));
        // "a" is still backing off, so the next request goes straight to "b".
        assert_eq!(dispatcher.execute(&RpcRequest::read("eth_chainId", json!([]))).await.unwrap(), json!("0x1"));

        let endpoints: Vec<String> = transport.calls().into_iter().map(|c| c.endpoint).collect();
        assert_eq!(endpoints, ["a", "b", "b"]);
        assert!((dispatcher.pool().snapshot()[0].health - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_idempotent_gets_one_attempt() {
        let transport = Arc::new(MockTransport::new(|_, _| Err(UpstreamError::Timeout)));
        let dispatcher = dispatcher(&["a", "b", "c"], Arc::clone(&transport), DispatcherConfig::default());

        let err = dispatcher
            .execute(&RpcRequest::submit("eth_sendRawTransaction", json!(["0x02"])))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Transient(_)));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_transient() {
        let transport = Arc::new(MockTransport::new(|_, _| Ok(json!("0x1"))).with_latency(Duration::from_secs(30)));
        let config = DispatcherConfig { request_timeout_ms: 100, max_attempts: 2, ..DispatcherConfig::default() };
        let dispatcher = dispatcher(&["a", "b"], Arc::clone(&transport), config);

        let err = dispatcher.execute(&RpcRequest::read("eth_chainId", json!([]))).await.unwrap_err();
        assert!(matches!(err, CoreError::EndpointsExhausted { attempts: 2, .. }));
        assert_eq!(dispatcher.pool().snapshot()[0].total_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_request() {
        let transport = Arc::new(MockTransport::new(|_, _| Ok(json!("0x1"))).with_latency(Duration::from_secs(5)));
        let dispatcher = dispatcher(&["a"], Arc::clone(&transport), DispatcherConfig::default());

        let cancel = CancellationToken::new();
        let request = RpcRequest::read("eth_chainId", json!([])).with_cancellation(cancel.clone());
        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });

        assert_eq!(dispatcher.execute(&request).await.unwrap_err(), CoreError::Cancelled);
        trigger.await.unwrap();
        assert_eq!(dispatcher.pool().snapshot()[0].total_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let transport = Arc::new(MockTransport::new(|_, _| Err(UpstreamError::Timeout)));
        let config = DispatcherConfig { backoff_base_ms: 1_000, jitter_factor: 0.0, ..DispatcherConfig::default() };
        let dispatcher = dispatcher(&["a", "b", "c"], Arc::clone(&transport), config);

        let request = RpcRequest::read("eth_chainId", json!([])).with_timeout(Duration::from_millis(1_500));
        assert_eq!(dispatcher.execute(&request).await.unwrap_err(), CoreError::DeadlineExceeded);
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_rate_budget_instead_of_failing() {
        let transport = Arc::new(MockTransport::new(|_, _| Ok(json!("0x1"))));
        let endpoints = vec![EndpointConfig::new("only", "http://only").with_rate_limit(10.0, 1)];
        let pool = Arc::new(EndpointPool::new(&endpoints, PoolConfig::default()));
        let dispatcher = Dispatcher::new(pool, transport.clone(), DispatcherConfig::default());

        for _ in 0..3 {
            dispatcher.execute(&RpcRequest::read("eth_chainId", json!([]))).await.unwrap();
        }
        assert_eq!(transport.call_count(), 3);
    }

    #[test]
    fn test_backoff_delay_grows_and_caps() {
        let config = DispatcherConfig { jitter_factor: 0.0, ..DispatcherConfig::default() };
        assert_eq!(config.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(config.backoff_delay(9), Duration::from_millis(2_000));
    }

    #[test]
    fn test_backoff_jitter_stays_in_range() {
        let config = DispatcherConfig::default();
        for _ in 0..100 {
            let delay = config.backoff_delay(2).as_millis();
            assert!((175..225).contains(&delay), "delay {delay} outside jitter range");
        }
    }
}
