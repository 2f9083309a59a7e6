//! Configuration module for Ingest Dump
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation. Every section has defaults,
//! so the server can run without any configuration file at all.

use lazy_static::lazy_static;
use regex_lite::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Default listening port
pub const DEFAULT_PORT: u16 = 7000;

lazy_static! {
    static ref ENV_PLACEHOLDER: Regex =
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]+))?\}").unwrap();
}

/// Substitute `${VAR}` and `${VAR:-fallback}` placeholders from the process
/// environment.
///
/// A placeholder whose variable is unset and that has no fallback is kept
/// as written.
pub(crate) fn expand_env_vars(input: &str) -> String {
    ENV_PLACEHOLDER
        .replace_all(input, |caps: &Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_else(|_| {
                caps.get(2)
                    .map_or_else(|| caps[0].to_string(), |fallback| fallback.as_str().to_string())
            })
        })
        .into_owned()
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Override the listening port, keeping the configured host
    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        let mut addr = self.server.socket_addr()?;
        addr.set_port(port);
        self.server.address = addr.to_string();
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.socket_addr()?;

        if self.storage.enabled && self.storage.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "storage.output_dir cannot be empty when storage is enabled".into(),
            ));
        }

        if self.progress.sample_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "progress.sample_interval_ms must be greater than zero".into(),
            ));
        }

        if self.metrics.enabled && self.metrics.port == self.server.socket_addr()?.port() {
            return Err(ConfigError::ValidationError(format!(
                "metrics.port {} collides with the server port",
                self.metrics.port
            )));
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
}

impl ServerConfig {
    /// Parse the configured address
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.address.parse().map_err(|e| {
            ConfigError::ValidationError(format!("Invalid address '{}': {}", self.address, e))
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
        }
    }
}

fn default_address() -> String {
    format!("0.0.0.0:{}", DEFAULT_PORT)
}

/// Storage configuration
///
/// When `enabled` is false every upload is written to a discard sink;
/// progress is still tracked and logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_enabled")]
    pub enabled: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: default_storage_enabled(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_storage_enabled() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Progress sampling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval_ms(),
        }
    }
}

fn default_sample_interval_ms() -> u64 {
    1000
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_port() -> u16 {
    9090
}
