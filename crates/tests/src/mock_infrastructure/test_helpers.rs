//! Configuration fixtures for tests against mock servers.

use warpscan_core::{config::AppConfig, upstream::EndpointConfig};

/// Config over `urls` (named `node-0`, `node-1`, ...) with millisecond backoff so failover
/// tests stay fast.
#[must_use]
pub fn config_for(urls: &[String]) -> AppConfig {
    let mut config = AppConfig::default();
    config.endpoints = urls
        .iter()
        .enumerate()
        .map(|(i, url)| EndpointConfig::new(format!("node-{i}"), url.clone()).with_rate_limit(0.0, 1))
        .collect();
    config.dispatcher.backoff_base_ms = 1;
    config.dispatcher.backoff_max_ms = 5;
    config.dispatcher.request_timeout_ms = 2_000;
    config
}

/// Hash-shaped string unique to `seed`.
#[must_use]
pub fn hash(seed: u64) -> String {
    format!("0x{seed:064x}")
}

/// Address-shaped string unique to `seed`.
#[must_use]
pub fn address(seed: u64) -> String {
    format!("0x{seed:040x}")
}
