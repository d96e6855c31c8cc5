//! Engine configuration.
//!
//! Loadable from TOML; every field except the address has a default, so a
//! minimal file is just `address = "tcp://127.0.0.1:6000"`.

use crate::error::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::thread;

/// Engine configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address to bind, e.g. `"tcp://127.0.0.1:6000?reuseport=true"`,
    /// `"udp://0.0.0.0:5353"`, or `"unix:///run/app.sock"`.
    pub address: String,

    /// Number of worker loops (default: available cores minus one).
    #[serde(default)]
    pub workers: Option<usize>,

    /// Run the global ticker.
    #[serde(default)]
    pub tick: bool,

    /// CPU cores to pin worker loops to, Linux-style (e.g. "0-3,6-8").
    #[serde(default)]
    pub cpu_affinity: Option<String>,

    /// Logging configuration (consumed by [`crate::logging::init`]).
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// A configuration with defaults for everything but the address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            workers: None,
            tick: false,
            cpu_affinity: None,
            logging: LoggingConfig::default(),
        }
    }

    /// Load a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Effective worker loop count: the configured value, or available
    /// parallelism minus one for the listener loop; always at least 1.
    pub fn worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(|| {
                thread::available_parallelism()
                    .map(|n| n.get().saturating_sub(1))
                    .unwrap_or(1)
            })
            .max(1)
    }
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: Config = toml::from_str(r#"address = "tcp://127.0.0.1:6000""#).unwrap();
        assert_eq!(config.address, "tcp://127.0.0.1:6000");
        assert!(config.workers.is_none());
        assert!(!config.tick);
        assert!(config.cpu_affinity.is_none());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert!(config.worker_count() >= 1);
    }

    #[test]
    fn full_config_parses() {
        let config: Config = toml::from_str(
            r#"
            address = "udp://0.0.0.0:5353"
            workers = 4
            tick = true
            cpu_affinity = "0-3"

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.worker_count(), 4);
        assert!(config.tick);
        assert_eq!(config.cpu_affinity.as_deref(), Some("0-3"));
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: Result<Config, _> = toml::from_str(
            r#"
            address = "tcp://127.0.0.1:6000"
            backlog = 128
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn configured_worker_count_is_clamped_to_one() {
        let mut config = Config::new("tcp://127.0.0.1:0");
        config.workers = Some(0);
        assert_eq!(config.worker_count(), 1);
    }
}
