//! Configuration source trait

use crate::config::TunnelConfig;
use crate::error::ConfigError;

/// Supplies the live tunnel set
///
/// The watchdog calls this once per cycle and never caches the result, so
/// added or removed tunnels take effect on the next cycle.
pub trait ConfigSource: Send + Sync {
    /// All tunnels currently defined, configured or not
    fn list_tunnels(&self) -> Result<Vec<TunnelConfig>, ConfigError>;
}
