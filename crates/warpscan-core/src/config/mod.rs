//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Later layers override earlier ones:
//!
//! 1. **Compiled defaults**: `Default` impls and serde defaults of every section
//! 2. **Config file**: TOML file named by `WARPSCAN_CONFIG` (default `config/warpscan.toml`,
//!    optional)
//! 3. **Environment variables**: `WARPSCAN__SECTION__FIELD`, e.g. `WARPSCAN__CACHE__ENABLED=false`
//!
//! The block-explorer API key additionally falls back to `ETHERSCAN_API_KEY`.
//!
//! # Example
//!
//! ```toml
//! [[endpoints]]
//! name = "primary"
//! url = "https://eth.example.com"
//! rate_limit_per_second = 20
//! burst = 10
//!
//! [cache]
//! reorg_window = 64
//! persistent_path = "warpscan-cache.db"
//!
//! [live]
//! head_poll_interval_ms = 2000
//! ```

use crate::{
    cache::CacheConfig,
    live::LiveConfig,
    logging::LoggingConfig,
    metadata::ExplorerConfig,
    upstream::{DispatcherConfig, EndpointConfig, PoolConfig},
};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Universal resolver settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Budget for the whole candidate sequence of one query.
    #[serde(default = "default_resolver_deadline_ms")]
    pub deadline_ms: u64,
}

fn default_resolver_deadline_ms() -> u64 {
    15_000
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { deadline_ms: default_resolver_deadline_ms() }
    }
}

impl ResolverConfig {
    #[must_use]
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// Ordered node list; order breaks ties between equally healthy endpoints.
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<EndpointConfig>,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub live: LiveConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub explorer: ExplorerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_endpoints() -> Vec<EndpointConfig> {
    vec![EndpointConfig::new("local", "http://127.0.0.1:8545")]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            dispatcher: DispatcherConfig::default(),
            pool: PoolConfig::default(),
            cache: CacheConfig::default(),
            live: LiveConfig::default(),
            resolver: ResolverConfig::default(),
            explorer: ExplorerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads `config_path` (if it exists) with environment overrides on top.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the file or environment cannot be parsed.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("WARPSCAN").separator("__").try_parsing(true))
            .build()?;

        let mut config: Self = builder.try_deserialize()?;
        if config.explorer.api_key.is_none() {
            config.explorer.api_key = std::env::var("ETHERSCAN_API_KEY").ok().filter(|k| !k.trim().is_empty());
        }
        Ok(config)
    }

    /// Loads from `WARPSCAN_CONFIG`, defaulting to `config/warpscan.toml`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("WARPSCAN_CONFIG").unwrap_or_else(|_| "config/warpscan.toml".to_string());
        Self::from_file(&config_path)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.endpoints.is_empty() {
            return invalid("no endpoints configured".into());
        }
        for endpoint in &self.endpoints {
            if endpoint.name.trim().is_empty() {
                return invalid(format!("endpoint with url {} has no name", endpoint.url));
            }
            if !is_http_url(&endpoint.url) {
                return invalid(format!("endpoint {} has an invalid url", endpoint.name));
            }
            if endpoint.rate_limit_per_second < 0.0 || endpoint.burst == 0 {
                return invalid(format!("endpoint {} needs a non-negative rate and a burst of at least 1", endpoint.name));
            }
        }

        if self.dispatcher.max_attempts == 0 {
            return invalid("dispatcher.max_attempts must be greater than 0".into());
        }
        if self.dispatcher.request_timeout_ms == 0 || self.dispatcher.max_in_flight == 0 {
            return invalid("dispatcher.request_timeout_ms and max_in_flight must be greater than 0".into());
        }
        if !(0.0..=1.0).contains(&self.dispatcher.jitter_factor) {
            return invalid("dispatcher.jitter_factor must be within [0, 1]".into());
        }
        if self.dispatcher.backoff_base_ms > self.dispatcher.backoff_max_ms {
            return invalid("dispatcher.backoff_base_ms exceeds backoff_max_ms".into());
        }

        if self.pool.max_consecutive_failures == 0 {
            return invalid("pool.max_consecutive_failures must be greater than 0".into());
        }

        for kind in crate::cache::EntityKind::ALL {
            if self.cache.limits(kind).max_entries == 0 {
                return invalid(format!("cache.{kind}.max_entries must be greater than 0"));
            }
        }
        if self.cache.reorg_window == 0 {
            return invalid("cache.reorg_window must be greater than 0".into());
        }

        if self.live.head_poll_interval_ms == 0 || self.live.gas_poll_interval_ms == 0 {
            return invalid("live poll intervals must be greater than 0".into());
        }
        if self.live.queue_capacity == 0 {
            return invalid("live.queue_capacity must be greater than 0".into());
        }
        if self.live.cache_purge_interval_ms == 0 {
            return invalid("live.cache_purge_interval_ms must be greater than 0".into());
        }

        if self.resolver.deadline_ms == 0 {
            return invalid("resolver.deadline_ms must be greater than 0".into());
        }

        if self.explorer.is_configured() && !is_http_url(&self.explorer.base_url) {
            return invalid("explorer.base_url is not an http(s) url".into());
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return invalid("logging.format must be 'json' or 'pretty'".into());
        }

        Ok(())
    }
}

fn is_http_url(raw: &str) -> bool {
    url::Url::parse(raw).is_ok_and(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_config_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.endpoints.len(), 1);
        assert_eq!(config.dispatcher.max_attempts, 4);
        assert_eq!(config.cache.reorg_window, 64);
        assert_eq!(config.resolver.deadline(), Duration::from_secs(15));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.endpoints.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.endpoints = vec![EndpointConfig::new("bad", "ws://node:8546")];
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.dispatcher.jitter_factor = 1.5;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.cache.token.max_entries = 0;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.live.gas_poll_interval_ms = 0;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.live.cache_purge_interval_ms = 0;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.logging.format = "xml".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_content = r#"
[[endpoints]]
name = "primary"
url = "https://eth.example.com"

[[endpoints]]
name = "backup"
url = "http://10.0.0.2:8545"
rate_limit_per_second = 5
burst = 2

[cache]
reorg_window = 12

[cache.address]
max_entries = 50
ttl_secs = 3
"#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.endpoints[0].rate_limit_per_second, 25.0);
        assert_eq!(config.endpoints[1].burst, 2);
        assert_eq!(config.cache.reorg_window, 12);
        assert_eq!(config.cache.address.ttl_secs, 3);
        assert_eq!(config.cache.block.max_entries, 1_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_file_and_environment_layers() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[[endpoints]]\nname = \"file\"\nurl = \"https://file.example.com\"\n\n[live]\nqueue_capacity = 8").unwrap();

        std::env::set_var("WARPSCAN__LIVE__QUEUE_CAPACITY", "16");
        std::env::set_var("ETHERSCAN_API_KEY", "from-env");
        let config = AppConfig::from_file(file.path()).unwrap();
        std::env::remove_var("WARPSCAN__LIVE__QUEUE_CAPACITY");
        std::env::remove_var("ETHERSCAN_API_KEY");

        assert_eq!(config.endpoints[0].name, "file");
        assert_eq!(config.live.queue_capacity, 16);
        assert_eq!(config.explorer.api_key.as_deref(), Some("from-env"));
    }

    #[test]
    #[serial]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AppConfig::from_file("does/not/exist.toml").unwrap();
        assert_eq!(config.endpoints, AppConfig::default().endpoints);
    }
}
