//! Tunnel inventory sources

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use vortex_core::config::{TunnelConfig, TunnelInventory};
use vortex_core::traits::ConfigSource;
use vortex_core::ConfigError;

/// Reads the tunnel inventory file on every call
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileConfigSource {
    fn list_tunnels(&self) -> Result<Vec<TunnelConfig>, ConfigError> {
        Ok(TunnelInventory::load(&self.path)?.tunnels)
    }
}

/// In-memory inventory that can be replaced at runtime
#[derive(Debug, Default)]
pub struct StaticConfigSource {
    tunnels: Mutex<Vec<TunnelConfig>>,
}

impl StaticConfigSource {
    pub fn new(tunnels: Vec<TunnelConfig>) -> Self {
        Self {
            tunnels: Mutex::new(tunnels),
        }
    }

    /// Replace the inventory; the watchdog sees it on its next cycle
    pub fn set(&self, tunnels: Vec<TunnelConfig>) {
        *self
            .tunnels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = tunnels;
    }
}

impl ConfigSource for StaticConfigSource {
    fn list_tunnels(&self) -> Result<Vec<TunnelConfig>, ConfigError> {
        Ok(self
            .tunnels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }
}
