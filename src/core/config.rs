//! Configuration parsing and validation.
//!
//! kvbridge configuration is loaded from TOML files with CLI overrides. Every
//! section has defaults, so an empty file is a valid configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Top-level kvbridge configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// gRPC listener configuration.
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Identity reported in response headers.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Storage backend selection.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// gRPC listener configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:2379").
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Largest accepted request message in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_message_size: default_max_message_size(),
        }
    }
}

/// Cluster identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    #[serde(default = "default_cluster_id")]
    pub cluster_id: u64,

    #[serde(default = "default_member_id")]
    pub member_id: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cluster_id: default_cluster_id(),
            member_id: default_member_id(),
        }
    }
}

/// Backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Backend mode. Only "memory" is available.
    #[serde(default = "default_backend_mode")]
    pub mode: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            mode: default_backend_mode(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:2379".to_string()
}

fn default_max_message_size() -> usize {
    4 * 1024 * 1024
}

fn default_cluster_id() -> u64 {
    1
}

fn default_member_id() -> u64 {
    1
}

fn default_backend_mode() -> String {
    "memory".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration, defaults included, as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize config")
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref bind) = overrides.bind {
            self.listener.bind = bind.clone();
        }
    }

    /// The listener address, parsed.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.listener
            .bind
            .parse()
            .with_context(|| format!("listener.bind is not a socket address: {}", self.listener.bind))
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_listener()?;
        self.validate_backend()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_listener(&self) -> Result<()> {
        self.bind_addr()?;
        if self.listener.max_message_size == 0 {
            anyhow::bail!("listener.max_message_size must be > 0");
        }
        Ok(())
    }

    fn validate_backend(&self) -> Result<()> {
        if self.backend.mode != "memory" {
            anyhow::bail!(
                "backend.mode must be 'memory', got: {}",
                self.backend.mode
            );
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                LOG_LEVELS,
                self.telemetry.log_level
            );
        }
        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override listener bind address.
    pub bind: Option<String>,
}
