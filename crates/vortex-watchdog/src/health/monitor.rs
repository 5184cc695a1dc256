//! Tunnel and port health tracking
//!
//! Tunnels and ports are tracked in separate maps: a tunnel can be healthy
//! while one of its forwarded ports is not, and vice versa.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use vortex_core::config::TunnelConfig;
use vortex_core::traits::HealthProbe;

use super::status::HealthStatus;

/// Serializable view of all health records
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub failure_threshold: u32,
    pub tunnels: BTreeMap<String, HealthStatus>,
    pub ports: BTreeMap<u16, HealthStatus>,
}

/// Tracks health state per tunnel and per port
pub struct HealthMonitor {
    probe: Arc<dyn HealthProbe>,
    probe_timeout: Duration,
    failure_threshold: u32,
    tunnel_health: BTreeMap<String, HealthStatus>,
    port_health: BTreeMap<u16, HealthStatus>,
}

impl HealthMonitor {
    /// Create a monitor.
    ///
    /// `failure_threshold` is the number of consecutive failed checks before
    /// an entity becomes eligible for recovery; it is raised to at least 1.
    pub fn new(probe: Arc<dyn HealthProbe>, failure_threshold: u32, probe_timeout: Duration) -> Self {
        Self {
            probe,
            probe_timeout,
            failure_threshold: failure_threshold.max(1),
            tunnel_health: BTreeMap::new(),
            port_health: BTreeMap::new(),
        }
    }

    /// Consecutive failures required for recovery
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Run a probe under the probe timeout; expiry counts as unhealthy
    async fn bounded<F>(&self, what: &str, probe: F) -> bool
    where
        F: Future<Output = bool>,
    {
        match tokio::time::timeout(self.probe_timeout, probe).await {
            Ok(ok) => ok,
            Err(_) => {
                tracing::warn!("{} probe timed out after {:?}", what, self.probe_timeout);
                false
            }
        }
    }

    /// Probe one tunnel: interface up with an address AND an active session
    async fn probe_tunnel(&self, tunnel: &TunnelConfig) -> (bool, String) {
        let (Some(tunnel_id), Some(interface)) = (tunnel.tunnel_id, tunnel.interface.as_deref())
        else {
            return (false, "Tunnel is not configured".to_string());
        };

        let interface_up = self
            .bounded("Interface", self.probe.interface_up(interface))
            .await;
        let tunnel_active = self
            .bounded("Tunnel", self.probe.tunnel_active(tunnel_id))
            .await;

        let message = format!(
            "Interface: {}, Tunnel: {}",
            if interface_up { "UP" } else { "DOWN" },
            if tunnel_active { "Active" } else { "Inactive" }
        );
        (interface_up && tunnel_active, message)
    }

    /// Record a tunnel probe result and return the new status
    pub fn record_tunnel(&mut self, name: &str, ok: bool, message: impl Into<String>) -> HealthStatus {
        let status = HealthStatus::observe(self.tunnel_health.get(name), ok, message);
        if status.healthy {
            tracing::info!(
                "Tunnel '{}': {} (failures: {})",
                name,
                status.message,
                status.failure_count
            );
        } else {
            tracing::warn!(
                "Tunnel '{}': {} (failures: {})",
                name,
                status.message,
                status.failure_count
            );
        }
        self.tunnel_health.insert(name.to_string(), status.clone());
        status
    }

    /// Record a port probe result and return the new status
    pub fn record_port(&mut self, port: u16, ok: bool, message: impl Into<String>) -> HealthStatus {
        let status = HealthStatus::observe(self.port_health.get(&port), ok, message);
        if status.healthy {
            tracing::info!(
                "Port {}: {} (failures: {})",
                port,
                status.message,
                status.failure_count
            );
        } else {
            tracing::warn!(
                "Port {}: {} (failures: {})",
                port,
                status.message,
                status.failure_count
            );
        }
        self.port_health.insert(port, status.clone());
        status
    }

    /// Check every tunnel in order, one at a time
    pub async fn check_all_tunnel_health(
        &mut self,
        tunnels: &[TunnelConfig],
    ) -> BTreeMap<String, HealthStatus> {
        let mut results = BTreeMap::new();
        for tunnel in tunnels {
            let (ok, message) = self.probe_tunnel(tunnel).await;
            let status = self.record_tunnel(&tunnel.name, ok, message);
            results.insert(tunnel.name.clone(), status);
        }
        results
    }

    /// Check every port in order, one at a time
    pub async fn check_all_port_health(&mut self, ports: &[u16]) -> BTreeMap<u16, HealthStatus> {
        let mut results = BTreeMap::new();
        for &port in ports {
            let listening = self
                .bounded("Port", self.probe.port_listening(port))
                .await;
            let message = format!(
                "Port {}: {}",
                port,
                if listening { "LISTENING" } else { "NOT LISTENING" }
            );
            let status = self.record_port(port, listening, message);
            results.insert(port, status);
        }
        results
    }

    /// Whether a status has failed often enough to warrant recovery
    pub fn should_attempt_recovery(&self, status: &HealthStatus) -> bool {
        !status.healthy && status.failure_count >= self.failure_threshold
    }

    /// Tunnels and ports currently eligible for recovery
    pub fn get_recovery_needed(&self) -> (Vec<String>, Vec<u16>) {
        let tunnels = self
            .tunnel_health
            .iter()
            .filter(|(_, s)| self.should_attempt_recovery(s))
            .map(|(name, _)| name.clone())
            .collect();
        let ports = self
            .port_health
            .iter()
            .filter(|(_, s)| self.should_attempt_recovery(s))
            .map(|(&port, _)| port)
            .collect();
        (tunnels, ports)
    }

    /// Tunnels and ports whose last check failed, regardless of threshold
    pub fn get_unhealthy_components(&self) -> (Vec<String>, Vec<u16>) {
        let tunnels = self
            .tunnel_health
            .iter()
            .filter(|(_, s)| !s.healthy)
            .map(|(name, _)| name.clone())
            .collect();
        let ports = self
            .port_health
            .iter()
            .filter(|(_, s)| !s.healthy)
            .map(|(&port, _)| port)
            .collect();
        (tunnels, ports)
    }

    /// Forget a port, so its next check starts a fresh streak
    pub fn clear_port_health(&mut self, port: u16) -> Option<HealthStatus> {
        self.port_health.remove(&port)
    }

    /// Forget a tunnel that is no longer configured
    pub fn clear_tunnel_health(&mut self, name: &str) -> Option<HealthStatus> {
        self.tunnel_health.remove(name)
    }

    /// Current record for a tunnel
    pub fn tunnel_health(&self, name: &str) -> Option<&HealthStatus> {
        self.tunnel_health.get(name)
    }

    /// Current record for a port
    pub fn port_health(&self, port: u16) -> Option<&HealthStatus> {
        self.port_health.get(&port)
    }

    /// Names of all tracked tunnels
    pub fn tracked_tunnels(&self) -> Vec<String> {
        self.tunnel_health.keys().cloned().collect()
    }

    /// All tracked ports
    pub fn tracked_ports(&self) -> Vec<u16> {
        self.port_health.keys().copied().collect()
    }

    /// Copy of all records
    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            failure_threshold: self.failure_threshold,
            tunnels: self.tunnel_health.clone(),
            ports: self.port_health.clone(),
        }
    }

    /// Human-readable health report
    pub fn health_report(&self) -> String {
        let mut lines = vec!["=== VortexL2 Health Report ===".to_string()];

        if !self.tunnel_health.is_empty() {
            lines.push(String::new());
            lines.push("TUNNELS:".to_string());
            for (name, status) in &self.tunnel_health {
                lines.push(format!("  {} {}: {}", status.mark(), name, status.message));
            }
        }

        if !self.port_health.is_empty() {
            lines.push(String::new());
            lines.push("PORTS:".to_string());
            for status in self.port_health.values() {
                lines.push(format!("  {} {}", status.mark(), status.message));
            }
        }

        lines.join("\n")
    }
}
