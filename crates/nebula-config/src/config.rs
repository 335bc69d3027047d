//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Server endpoint and reconnect budget.
    pub network: NetworkConfig,
    /// Delay strategy between reconnect attempts.
    pub reconnect: ReconnectConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Server host name or IP.
    pub server_address: String,
    /// Server port.
    pub server_port: u16,
    /// Connection scheme (e.g. `tcp`).
    pub protocol: String,
    /// Reconnect budget: negative retries forever, 0 never retries,
    /// positive allows that many reconnects.
    pub reconnect_budget: i32,
    /// Largest accepted frame in bytes.
    pub max_frame_size: u32,
}

/// How reconnect attempts are spaced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Reconnect straight away.
    Immediate,
    /// Exponential delay with jitter.
    Exponential,
}

/// Reconnect delay configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Which strategy to use.
    pub strategy: BackoffStrategy,
    /// First delay in milliseconds (exponential only).
    pub initial_delay_ms: u64,
    /// Growth factor per attempt (exponential only).
    pub multiplier: f64,
    /// Delay cap in milliseconds (exponential only).
    pub max_delay_ms: u64,
    /// Jitter factor, 0.0 to 1.0 (exponential only).
    pub jitter: f64,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            server_port: 7777,
            protocol: "tcp".to_string(),
            reconnect_budget: 5,
            max_frame_size: 1 << 20,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Immediate,
            initial_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter: 0.25,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// File name of the persisted config inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.ron";

impl Config {
    /// Per-user directory holding `config.ron` and `logs/`.
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|d| d.join("nebula-client"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Location of the config file inside `config_dir`.
    pub fn path_in(config_dir: &Path) -> PathBuf {
        config_dir.join(CONFIG_FILE_NAME)
    }

    fn read_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        ron::from_str(&text).map_err(ConfigError::ParseError)
    }

    /// Read `config.ron` from `config_dir`, writing the defaults there first
    /// if the file does not exist yet.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = Self::path_in(config_dir);
        if !path.exists() {
            let defaults = Self::default();
            defaults.save(config_dir)?;
            log::info!("Wrote default client config to {}", path.display());
            return Ok(defaults);
        }

        let config = Self::read_from(&path)?;
        log::info!(
            "Client config loaded from {} (server {}:{})",
            path.display(),
            config.network.server_address,
            config.network.server_port
        );
        Ok(config)
    }

    /// Write this config to `config_dir`, creating the directory if needed.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::new().depth_limit(3))
            .map_err(ConfigError::SerializeError)?;
        std::fs::write(Self::path_in(config_dir), text).map_err(ConfigError::WriteError)
    }

    /// Re-read the file. `Some` only when it differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let fresh = Self::read_from(&Self::path_in(config_dir))?;
        if fresh == *self {
            return Ok(None);
        }
        log::info!("Client config changed on disk");
        Ok(Some(fresh))
    }
}
