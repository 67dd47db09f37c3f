//! Configuration loading for sync-engine.
//!
//! Configuration is loaded from a TOML file. Every section and field is
//! optional and falls back to the defaults below.

use clipsync_core::PollingBackoff;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for the sync engine.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    /// Polling configuration.
    #[serde(default)]
    pub polling: PollingConfig,
    /// Resolver configuration.
    #[serde(default)]
    pub resolver: ResolverConfig,
    /// Token cache configuration.
    #[serde(default)]
    pub token: TokenConfig,
}

/// Periodic re-resolution configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    /// Interval between polls while nothing fails (default: 60).
    #[serde(default = "default_base_interval_secs")]
    pub base_interval_secs: u64,
    /// Constant part of the retry delay after a failure (default: 1000).
    #[serde(default = "default_fail_base_ms")]
    pub fail_base_ms: u64,
    /// Multiplier of the exponential part of the retry delay (default: 1000).
    #[serde(default = "default_fail_step_ms")]
    pub fail_step_ms: u64,
    /// Failure count after which the retry delay stops growing (default: 6).
    #[serde(default = "default_max_fail_exponent")]
    pub max_fail_exponent: u32,
}

/// Resolver configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    /// How long `get_connect_host_address` waits for a resolution (default: 5000).
    #[serde(default = "default_connect_address_timeout_ms")]
    pub connect_address_timeout_ms: u64,
}

/// Token cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// Seconds a cached pairing token stays usable (default: 300).
    #[serde(default = "default_token_ttl_secs")]
    pub ttl_secs: u64,
}

// Default value functions
fn default_base_interval_secs() -> u64 {
    60
}

fn default_fail_base_ms() -> u64 {
    1000
}

fn default_fail_step_ms() -> u64 {
    1000
}

fn default_max_fail_exponent() -> u32 {
    6
}

fn default_connect_address_timeout_ms() -> u64 {
    5000
}

fn default_token_ttl_secs() -> u64 {
    300 // 5 minutes
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            base_interval_secs: default_base_interval_secs(),
            fail_base_ms: default_fail_base_ms(),
            fail_step_ms: default_fail_step_ms(),
            max_fail_exponent: default_max_fail_exponent(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            connect_address_timeout_ms: default_connect_address_timeout_ms(),
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_token_ttl_secs(),
        }
    }
}

impl PollingConfig {
    /// Build the backoff curve described by this configuration.
    pub fn backoff(&self) -> PollingBackoff {
        PollingBackoff::new(
            Duration::from_secs(self.base_interval_secs),
            Duration::from_millis(self.fail_base_ms),
            Duration::from_millis(self.fail_step_ms),
            self.max_fail_exponent,
        )
    }
}

impl ResolverConfig {
    /// Bound on waiting for a connect address.
    pub fn connect_address_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_address_timeout_ms)
    }
}

impl TokenConfig {
    /// Token freshness window.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
