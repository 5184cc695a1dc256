//! Recovery action traits

use async_trait::async_trait;

use crate::config::TunnelConfig;
use crate::types::ActionOutcome;

/// Creates and destroys tunnel resources
#[async_trait]
pub trait TunnelLifecycle: Send + Sync {
    /// Tear the tunnel down
    async fn delete(&self, tunnel: &TunnelConfig) -> ActionOutcome;

    /// Bring the tunnel up with its full setup
    async fn create(&self, tunnel: &TunnelConfig) -> ActionOutcome;
}

/// Adds and removes port forwards through a tunnel
#[async_trait]
pub trait PortForwarder: Send + Sync {
    /// Remove the forward for `port`
    async fn remove(&self, tunnel: &TunnelConfig, port: u16) -> ActionOutcome;

    /// Create the forward for `port`
    async fn create(&self, tunnel: &TunnelConfig, port: u16) -> ActionOutcome;
}
