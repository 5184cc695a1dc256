//! Configuration management for the VortexL2 watchdog

mod tunnel;
mod watchdog;
pub mod serde_utils;

pub use tunnel::{TunnelConfig, TunnelInventory};
pub use watchdog::{BackoffConfig, CommandTemplates, PoolConfig, WatchdogConfig};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vortexl2")
}

/// Get the default watchdog configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("watchdog.toml")
}

/// Get the default tunnel inventory path
pub fn default_tunnels_path() -> PathBuf {
    default_config_dir().join("tunnels.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Load and validate the watchdog configuration
pub fn load_watchdog_config(path: &Path) -> Result<WatchdogConfig, ConfigError> {
    let config: WatchdogConfig = load_config(path)?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}
