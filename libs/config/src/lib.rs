//! Collector Configuration
//!
//! Loads [`CollectorConfig`] from, in order of precedence, the process environment
//! (unprefixed keys such as `HOST` and `COLLECTOR_CONNECT`), an optional TOML file and the
//! built-in defaults. [`CollectorConfig::validate`] must pass before a collector starts; a
//! validation failure is fatal at startup.

use codec::RouterIdentity;
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    Missing(&'static str),

    #[error("Invalid configuration value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config_crate::ConfigError),
}

/// Deployment environment name that switches the default log level to `INFO`
pub const PRODUCTION: &str = "production";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Router/session identity
    #[serde(default)]
    pub host: String,

    /// Broker endpoint `host:port`
    #[serde(default)]
    pub collector_connect: String,

    #[serde(default = "default_environment")]
    pub environment: String,

    /// Explicit log level; see [`CollectorConfig::log_level`] for the default
    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Global Envelope Queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_broker_topic")]
    pub broker_topic: String,

    /// Secondary sink endpoint; discarded when unset
    #[serde(default)]
    pub sender_connect: Option<String>,

    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,

    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Enables the HTTP health server when set
    #[serde(default)]
    pub health_port: Option<u16>,
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/bmp-collector")
}

fn default_queue_capacity() -> usize {
    10_000_000
}

fn default_broker_topic() -> String {
    "bmp.raw".to_string()
}

fn default_listen_addr() -> String {
    "0.0.0.0:11019".to_string()
}

fn default_drain_timeout_secs() -> u64 {
    30
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_metrics_interval_secs() -> u64 {
    10
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

impl CollectorConfig {
    /// Load from the process environment and an optional TOML file
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::load_from(file, None)
    }

    /// Load with an explicit variable map in place of the process environment
    pub fn load_from(file: Option<&Path>, vars: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = file {
            info!("Loading collector config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(Environment::default().try_parsing(true).source(vars));

        let mut config: CollectorConfig = builder.build()?.try_deserialize()?;
        config.normalize();
        debug!(?config, "Collector configuration loaded");
        Ok(config)
    }

    fn normalize(&mut self) {
        self.host = self.host.trim().to_string();
        self.collector_connect = self.collector_connect.trim().to_string();
        self.environment = self.environment.trim().to_lowercase();
        if let Some(level) = self.log_level.as_mut() {
            *level = level.trim().to_uppercase();
        }
        if self.sender_connect.as_deref().is_some_and(|s| s.trim().is_empty()) {
            self.sender_connect = None;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(ConfigError::Missing("HOST"));
        }
        if self.collector_connect.is_empty() {
            return Err(ConfigError::Missing("COLLECTOR_CONNECT"));
        }
        validate_endpoint("COLLECTOR_CONNECT", &self.collector_connect)?;
        if let Some(sender) = &self.sender_connect {
            validate_endpoint("SENDER_CONNECT", sender)?;
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "QUEUE_CAPACITY",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.broker_topic.is_empty() || self.broker_topic.len() > u16::MAX as usize {
            return Err(ConfigError::Invalid {
                key: "BROKER_TOPIC",
                reason: format!("length {} out of range", self.broker_topic.len()),
            });
        }
        self.listen_addr()?;
        if self.metrics_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "METRICS_INTERVAL_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.retry_base_delay_ms == 0 || self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(ConfigError::Invalid {
                key: "RETRY_BASE_DELAY_MS",
                reason: format!(
                    "{}ms must be non-zero and at most RETRY_MAX_DELAY_MS ({}ms)",
                    self.retry_base_delay_ms, self.retry_max_delay_ms
                ),
            });
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment == PRODUCTION
    }

    /// Configured level, else `INFO` in production and `DEBUG` everywhere else
    pub fn log_level(&self) -> &str {
        match self.log_level.as_deref() {
            Some(level) if !level.is_empty() => level,
            _ if self.is_production() => "INFO",
            _ => "DEBUG",
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen_addr.parse().map_err(|e| ConfigError::Invalid {
            key: "LISTEN_ADDR",
            reason: format!("{}: {}", self.listen_addr, e),
        })
    }

    pub fn router_identity(&self) -> RouterIdentity {
        RouterIdentity::from_host(&self.host)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

fn validate_endpoint(key: &'static str, endpoint: &str) -> Result<()> {
    let valid = endpoint
        .rsplit_once(':')
        .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
    if valid {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            key,
            reason: format!("{} is not a host:port endpoint", endpoint),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn minimal() -> HashMap<String, String> {
        vars(&[("HOST", "rrc00"), ("COLLECTOR_CONNECT", "broker:9092")])
    }

    #[test]
    fn test_defaults() {
        let config = CollectorConfig::load_from(None, Some(minimal())).unwrap();
        config.validate().unwrap();

        assert_eq!(config.environment, "development");
        assert_eq!(config.log_level(), "DEBUG");
        assert_eq!(config.queue_capacity, 10_000_000);
        assert_eq!(config.broker_topic, "bmp.raw");
        assert_eq!(config.state_dir, PathBuf::from("/var/lib/bmp-collector"));
        assert_eq!(config.listen_addr().unwrap().port(), 11019);
        assert_eq!(config.drain_timeout(), Duration::from_secs(30));
        assert!(config.sender_connect.is_none());
        assert!(config.health_port.is_none());
    }

    #[test]
    fn test_production_log_level() {
        let mut env = minimal();
        env.insert("ENVIRONMENT".into(), "Production".into());
        let config = CollectorConfig::load_from(None, Some(env.clone())).unwrap();
        assert!(config.is_production());
        assert_eq!(config.log_level(), "INFO");

        env.insert("LOG_LEVEL".into(), "warn".into());
        let config = CollectorConfig::load_from(None, Some(env)).unwrap();
        assert_eq!(config.log_level(), "WARN");
    }

    #[test]
    fn test_missing_host_is_fatal() {
        let config =
            CollectorConfig::load_from(None, Some(vars(&[("COLLECTOR_CONNECT", "b:1")]))).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Missing("HOST"))));

        let config = CollectorConfig::load_from(None, Some(vars(&[("HOST", "r1")]))).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("COLLECTOR_CONNECT"))
        ));
    }

    #[test]
    fn test_invalid_values() {
        let mut env = minimal();
        env.insert("QUEUE_CAPACITY".into(), "0".into());
        let config = CollectorConfig::load_from(None, Some(env)).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "QUEUE_CAPACITY", .. })
        ));

        let mut env = minimal();
        env.insert("COLLECTOR_CONNECT".into(), "no-port".into());
        let config = CollectorConfig::load_from(None, Some(env)).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "COLLECTOR_CONNECT", .. })
        ));
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
host = "route-views2"
collector_connect = "broker:9092"
queue_capacity = 64
sender_connect = "downstream:5000"
"#
        )
        .unwrap();

        let env = vars(&[("QUEUE_CAPACITY", "128")]);
        let config = CollectorConfig::load_from(Some(file.path()), Some(env)).unwrap();
        config.validate().unwrap();

        assert_eq!(config.queue_capacity, 128);
        assert_eq!(config.sender_connect.as_deref(), Some("downstream:5000"));
        assert_eq!(config.router_identity().sys_descr, "route-views2.routeviews.org");
    }
}
