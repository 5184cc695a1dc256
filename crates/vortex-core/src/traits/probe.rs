//! Health probe trait

use async_trait::async_trait;

/// Boolean health signals from the host
///
/// A probe that cannot run (spawn failure, timeout) reports `false`.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Interface is up and has an address assigned
    async fn interface_up(&self, interface: &str) -> bool;

    /// Tunnel reports an active session
    async fn tunnel_active(&self, tunnel_id: u32) -> bool;

    /// Something is listening on the port
    async fn port_listening(&self, port: u16) -> bool;
}
