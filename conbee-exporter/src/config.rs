//! Configuration for the ConBee exporter.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub use conbee_common::config::{LogFormat, LoggingConfig};

/// Environment variable holding the deCONZ API key.
pub const API_KEY_ENV: &str = "CONBEE_API_KEY";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] conbee_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("The required environment variable '{0}' is not set")]
    MissingApiKey(&'static str),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Gateway connection settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Poll scheduling and registry limits.
    #[serde(default)]
    pub polling: PollingConfig,

    /// Sensor filtering settings.
    #[serde(default)]
    pub filters: FilterConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// deCONZ gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway base URL, e.g. `http://192.168.1.20:80`. Discovered when unset.
    #[serde(default)]
    pub url: Option<String>,

    /// Discovery endpoint queried when `url` is unset.
    #[serde(default = "default_discovery_url")]
    pub discovery_url: String,

    /// Timeout for every gateway and discovery request (seconds).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_discovery_url() -> String {
    "https://phoscon.de/discover".to_string()
}

fn default_timeout() -> u64 {
    10
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: None,
            discovery_url: default_discovery_url(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:2112").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Metric namespace prefix (default: "conbee").
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_listen() -> String {
    "0.0.0.0:2112".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_namespace() -> String {
    "conbee".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            namespace: default_namespace(),
        }
    }
}

/// Poll scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Seconds between poll cycles.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Maximum series across all gauges (memory protection).
    #[serde(default = "default_max_series")]
    pub max_series: usize,
}

fn default_interval() -> u64 {
    10
}

fn default_max_series() -> usize {
    100_000
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            max_series: default_max_series(),
        }
    }
}

/// Sensor filtering configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Only publish these sensor types (empty = all).
    #[serde(default)]
    pub include_types: Vec<String>,

    /// Never publish these sensor types.
    #[serde(default)]
    pub exclude_types: Vec<String>,

    /// Glob patterns matched against sensor display names to skip.
    #[serde(default)]
    pub exclude_names: Vec<String>,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: ExporterConfig = conbee_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = conbee_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.polling.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "interval_secs must be > 0".to_string(),
            ));
        }

        if self.polling.max_series == 0 {
            return Err(ConfigError::Validation(
                "max_series must be > 0".to_string(),
            ));
        }

        if self.gateway.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "timeout_secs must be > 0".to_string(),
            ));
        }

        if self
            .prometheus
            .listen
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.prometheus.listen
            )));
        }

        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if let Some(pattern) = self
            .filters
            .exclude_names
            .iter()
            .find(|p| glob::Pattern::new(p).is_err())
        {
            return Err(ConfigError::Validation(format!(
                "Invalid name pattern: {}",
                pattern
            )));
        }

        Ok(())
    }
}

/// Read the API key from the environment.
pub fn api_key_from_env() -> Result<String, ConfigError> {
    api_key_from(std::env::var(API_KEY_ENV).ok())
}

fn api_key_from(value: Option<String>) -> Result<String, ConfigError> {
    value
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .ok_or(ConfigError::MissingApiKey(API_KEY_ENV))
}
