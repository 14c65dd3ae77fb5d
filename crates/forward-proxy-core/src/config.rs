//! Configuration types for the forward producer proxy.
//!
//! Configuration is loaded from YAML files and validated before use. It is
//! read once at startup; nothing in the crate reloads it.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ConfigError, ConfigResult};

/// Root configuration for the proxy.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Forward producer pool configuration.
    #[serde(default)]
    pub forward: ForwardConfig,

    /// Broker connection configuration.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Prometheus metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Forward producer pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForwardConfig {
    /// Number of pooled producer clients.
    #[serde(default = "default_producer_num")]
    pub producer_num: usize,

    /// Worker scaling factor applied to the available parallelism of the
    /// host to size each client's in-flight request limit.
    #[serde(default = "default_producer_worker_factor")]
    pub producer_worker_factor: f64,
}

/// Broker connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// TCP connect timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Largest remoting frame accepted from a broker.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

/// Prometheus metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Whether to collect metrics.
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output logs in JSON format (for production).
    #[serde(default)]
    pub json: bool,
}

// Default value functions

fn default_producer_num() -> usize {
    2
}

fn default_producer_worker_factor() -> f64 {
    0.2
}

fn default_connection_timeout_ms() -> u64 {
    3_000
}

fn default_max_frame_size() -> usize {
    16 * 1024 * 1024
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            producer_num: default_producer_num(),
            producer_worker_factor: default_producer_worker_factor(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            connection_timeout_ms: default_connection_timeout_ms(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl ForwardConfig {
    /// Worker count for one pooled client: `ceil(parallelism * factor)`, at least 1.
    #[must_use]
    pub fn worker_threads(&self, parallelism: usize) -> usize {
        let scaled = (parallelism as f64 * self.producer_worker_factor).ceil();
        if scaled.is_finite() && scaled >= 1.0 {
            scaled as usize
        } else {
            1
        }
    }

    /// Worker count scaled from the parallelism of the current host.
    #[must_use]
    pub fn worker_threads_for_host(&self) -> usize {
        let parallelism = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        self.worker_threads(parallelism)
    }

    /// Validate the pool configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool size is zero or the worker factor is not
    /// a positive finite number.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.producer_num == 0 {
            return Err(ConfigError::InvalidPoolSize(self.producer_num));
        }

        if !self.producer_worker_factor.is_finite() || self.producer_worker_factor <= 0.0 {
            return Err(ConfigError::InvalidWorkerFactor(self.producer_worker_factor));
        }

        Ok(())
    }
}

// Configuration loading and validation

impl ProxyConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&content)
    }

    /// Load configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation check fails.
    pub fn validate(&self) -> ConfigResult<()> {
        self.forward.validate()
    }
}
