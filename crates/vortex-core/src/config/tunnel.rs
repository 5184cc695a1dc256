//! Tunnel inventory configuration

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::ConfigError;

/// A tunnel the watchdog monitors and can recreate
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Unique tunnel name
    pub name: String,

    /// Kernel tunnel identifier
    #[serde(default)]
    pub tunnel_id: Option<u32>,

    /// Tunnel network interface
    #[serde(default)]
    pub interface: Option<String>,

    /// Ports forwarded through this tunnel
    #[serde(default)]
    pub forwarded_ports: Vec<u16>,

    /// Connection pool size, overriding the watchdog default
    #[serde(default)]
    pub pool_size: Option<usize>,
}

impl TunnelConfig {
    /// Create a configured tunnel with no forwarded ports
    pub fn new(name: impl Into<String>, tunnel_id: u32, interface: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tunnel_id: Some(tunnel_id),
            interface: Some(interface.into()),
            ..Default::default()
        }
    }

    /// Builder-style port list
    pub fn with_ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.forwarded_ports = ports.into_iter().collect();
        self
    }

    /// A tunnel is configured once both its id and interface are known.
    /// Unconfigured tunnels are not monitored.
    pub fn is_configured(&self) -> bool {
        self.tunnel_id.is_some() && self.interface.is_some()
    }
}

/// The tunnel inventory file: an array of `[[tunnels]]` tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TunnelInventory {
    /// All tunnels, configured or not
    #[serde(default)]
    pub tunnels: Vec<TunnelConfig>,
}

impl TunnelInventory {
    /// Read and validate an inventory file.
    ///
    /// A missing file is an empty inventory: nothing has been set up yet.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("Tunnel inventory {:?} not found, nothing to monitor", path);
            return Ok(Self::default());
        }
        let inventory: Self = super::load_config(path)?;
        inventory.validate()?;
        tracing::debug!(
            "Loaded {} tunnel(s) from {:?}",
            inventory.tunnels.len(),
            path
        );
        Ok(inventory)
    }

    /// Check names and port ownership
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        let mut ports = HashSet::new();

        for tunnel in &self.tunnels {
            if tunnel.name.is_empty() {
                return Err(ConfigError::MissingField("tunnels.name".to_string()));
            }
            if !tunnel
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            {
                return Err(ConfigError::Invalid(format!(
                    "tunnel name '{}' may only contain ASCII letters, digits, '-', '_' and '.'",
                    tunnel.name
                )));
            }
            if !names.insert(tunnel.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate tunnel name '{}'",
                    tunnel.name
                )));
            }
            if tunnel.pool_size == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "tunnel '{}' has pool_size 0",
                    tunnel.name
                )));
            }
            for &port in &tunnel.forwarded_ports {
                if port == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "tunnel '{}' forwards port 0",
                        tunnel.name
                    )));
                }
                if !ports.insert(port) {
                    return Err(ConfigError::Invalid(format!(
                        "port {} is forwarded by more than one tunnel",
                        port
                    )));
                }
            }
        }
        Ok(())
    }

    /// Tunnels ready to be monitored
    pub fn configured(&self) -> impl Iterator<Item = &TunnelConfig> {
        self.tunnels.iter().filter(|t| t.is_configured())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[tunnels]]
        name = "edge-1"
        tunnel_id = 1000
        interface = "l2tpeth0"
        forwarded_ports = [443, 8443]

        [[tunnels]]
        name = "pending"
    "#;

    #[test]
    fn test_parse_inventory() {
        let inventory: TunnelInventory = toml::from_str(SAMPLE).unwrap();
        inventory.validate().unwrap();

        assert_eq!(inventory.tunnels.len(), 2);
        let configured: Vec<_> = inventory.configured().collect();
        assert_eq!(configured.len(), 1);
        assert_eq!(configured[0].name, "edge-1");
        assert_eq!(configured[0].forwarded_ports, vec![443, 8443]);
        assert_eq!(configured[0].pool_size, None);
    }

    #[test]
    fn test_is_configured_requires_id_and_interface() {
        let mut tunnel = TunnelConfig::new("t", 1, "l2tpeth0");
        assert!(tunnel.is_configured());
        tunnel.interface = None;
        assert!(!tunnel.is_configured());
    }

    #[test]
    fn test_duplicate_port_rejected() {
        let inventory = TunnelInventory {
            tunnels: vec![
                TunnelConfig::new("a", 1, "l2tpeth0").with_ports([80]),
                TunnelConfig::new("b", 2, "l2tpeth1").with_ports([80]),
            ],
        };
        assert!(matches!(inventory.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let inventory = TunnelInventory {
            tunnels: vec![
                TunnelConfig::new("a", 1, "l2tpeth0"),
                TunnelConfig::new("a", 2, "l2tpeth1"),
            ],
        };
        assert!(inventory.validate().is_err());
    }

    #[test]
    fn test_bad_name_rejected() {
        let inventory = TunnelInventory {
            tunnels: vec![TunnelConfig::new("a; rm -rf /", 1, "l2tpeth0")],
        };
        assert!(inventory.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let inventory = TunnelInventory::load(&dir.path().join("tunnels.toml")).unwrap();
        assert!(inventory.tunnels.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tunnels.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let inventory = TunnelInventory::load(&path).unwrap();
        assert_eq!(inventory.tunnels.len(), 2);
    }
}
