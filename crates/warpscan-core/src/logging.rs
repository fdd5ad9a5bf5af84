//! Tracing subscriber setup.
//!
//! Console output goes to stderr (json or pretty) so command output on stdout stays clean.
//! With `logging.file` set, a second non-ANSI layer appends the same events to that file.
//! `RUST_LOG` overrides the configured level; the shorthands `debug` and `trace` are scoped to
//! this workspace's crates.

use serde::{Deserialize, Serialize};
use std::{fs::OpenOptions, path::PathBuf, sync::Arc};
use thiserror::Error;
use tracing::Subscriber;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

const CRATES: [&str; 3] = ["warpscan_core", "warpscan", "tests"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Level applied to the workspace crates when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
    /// `json` or `pretty`.
    #[serde(default = "default_format")]
    pub format: String,
    /// Optional append-only log file.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_level(), format: default_format(), file: None }
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("cannot open log file {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tracing subscriber already installed: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

fn scoped(level: &str) -> String {
    let mut directives = String::from("warn");
    for krate in CRATES {
        directives.push_str(&format!(",{krate}={level}"));
    }
    directives
}

/// Filter directives for the given `RUST_LOG` value.
fn filter_directives(config_level: &str, rust_log: Option<&str>) -> String {
    match rust_log.map(str::trim) {
        Some(level @ ("debug" | "trace")) => scoped(level),
        Some(raw) if !raw.is_empty() => raw.to_string(),
        _ => scoped(config_level),
    }
}

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    let rust_log = std::env::var("RUST_LOG").ok();
    let directives = filter_directives(&config.level, rust_log.as_deref());
    EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(scoped("info")))
}

fn file_layer<S>(file: Option<Arc<std::fs::File>>) -> Option<impl Layer<S>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    file.map(|file| fmt::layer().with_writer(file).with_ansi(false).with_thread_ids(true))
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Fails if the log file cannot be opened or a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let file = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::File { path: path.clone(), source })?;
            Some(Arc::new(file))
        }
        None => None,
    };

    let registry = tracing_subscriber::registry().with(build_filter(config));

    if config.format.as_str() == "json" {
        let console = fmt::layer().json().with_writer(std::io::stderr);
        registry.with(console).with(file_layer(file)).try_init()?;
    } else {
        let console = fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(console).with(file_layer(file)).try_init()?;
    }

    tracing::debug!(file = ?config.file, format = %config.format, "logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_scope_configured_level() {
        assert_eq!(filter_directives("info", None), "warn,warpscan_core=info,warpscan=info,tests=info");
        assert_eq!(filter_directives("warn", Some("  ")), "warn,warpscan_core=warn,warpscan=warn,tests=warn");
    }

    #[test]
    fn test_rust_log_shorthand_and_passthrough() {
        assert_eq!(
            filter_directives("info", Some("trace")),
            "warn,warpscan_core=trace,warpscan=trace,tests=trace"
        );
        assert_eq!(filter_directives("info", Some("sqlx=debug")), "sqlx=debug");
    }

    #[test]
    fn test_unopenable_log_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig { file: Some(dir.path().join("missing").join("x.log")), ..LoggingConfig::default() };
        assert!(matches!(init_logging(&config), Err(LoggingError::File { .. })));
    }
}
