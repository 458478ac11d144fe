use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during config operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Config directory not found")]
    ConfigDirNotFound,
}

/// Engine tuning knobs, loaded from a JSON file in the user config directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long to wait for a tunnel to signal readiness before dropping the pair
    #[serde(default = "default_tunnel_ready_timeout_secs")]
    pub tunnel_ready_timeout_secs: u64,

    /// Per-request timeout for page and icon fetches
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Keep the tunnel and register the endpoint even when no icon could be
    /// resolved (the endpoint then carries the pod name as title and empty
    /// icon URLs). Off by default: an endpoint is only presented complete.
    #[serde(default)]
    pub keep_endpoint_without_icon: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tunnel_ready_timeout_secs: 5,
            http_timeout_secs: 3,
            keep_endpoint_without_icon: false,
        }
    }
}

fn default_tunnel_ready_timeout_secs() -> u64 {
    5
}

fn default_http_timeout_secs() -> u64 {
    3
}

impl EngineConfig {
    /// Get the configuration directory path
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir()
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join("porthole");

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)?;
        }

        Ok(config_dir)
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;

        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)?;
        let config: Self = serde_json::from_str(&contents)?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path()?;

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let contents = serde_json::to_string_pretty(self)?;
        fs::write(&path, contents)?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Tunnel readiness window as a [`Duration`]
    pub fn tunnel_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.tunnel_ready_timeout_secs)
    }

    /// HTTP fetch timeout as a [`Duration`]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
