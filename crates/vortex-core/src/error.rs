//! Core error types for the VortexL2 watchdog

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by a single watchdog iteration.
///
/// These never terminate the watchdog; the loop logs them and retries after
/// its error backoff.
#[derive(Error, Debug)]
pub enum WatchdogError {
    /// The live tunnel configuration could not be read
    #[error("Failed to read tunnel configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}
