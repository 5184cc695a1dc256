//! Tunnel watchdog
//!
//! A single cooperative loop that re-reads the tunnel inventory, checks the
//! health of every configured tunnel and forwarded port, and recovers the
//! ones that have failed `failure_threshold` consecutive checks. Once a
//! recovery cycle runs, every forward currently down is rebuilt with it.
//!
//! # Ordering
//!
//! Within one iteration everything is sequential: tunnel probes, then port
//! probes, then tunnel recovery (one tunnel at a time), then port recovery.
//! Two recovery actions never mutate host network state at the same time.
//!
//! # Cancellation
//!
//! [`WatchdogHandle::stop`] cancels a [`CancellationToken`]. The loop notices
//! it during the interval wait, during the pre-recovery pause and between
//! recovery entities. Teardown and recreation of one entity always run
//! together.

mod backoff;
mod recovery;

pub use backoff::{ExponentialBackoff, RecoveryBackoff};
pub use recovery::RecoveryReport;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use vortex_core::config::{TunnelConfig, WatchdogConfig};
use vortex_core::traits::{ConfigSource, HealthProbe, PortForwarder, TunnelLifecycle};
use vortex_core::{MonitoredEntity, WatchdogError};

use crate::connection::{ConnectionPoolManager, PoolStatus};
use crate::health::{HealthMonitor, HealthSnapshot};

/// The external systems the watchdog observes and acts on
#[derive(Clone)]
pub struct Collaborators {
    pub probe: Arc<dyn HealthProbe>,
    pub lifecycle: Arc<dyn TunnelLifecycle>,
    pub forwarder: Arc<dyn PortForwarder>,
    pub source: Arc<dyn ConfigSource>,
}

/// Cloneable stop switch for a running watchdog
#[derive(Debug, Clone)]
pub struct WatchdogHandle {
    cancel: CancellationToken,
}

impl WatchdogHandle {
    /// Signal the watchdog to stop
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Check if stop has been signalled
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Outcome of one watchdog iteration
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    /// Configured tunnels that were probed
    pub tunnels_checked: usize,
    /// Forwarded ports that were probed
    pub ports_checked: usize,
    /// Tunnels eligible for recovery this cycle
    pub tunnels_needing_recovery: Vec<String>,
    /// Ports that reached the failure threshold this cycle
    pub ports_needing_recovery: Vec<u16>,
    /// Present when a recovery cycle ran
    pub recovery: Option<RecoveryReport>,
}

/// Point-in-time view of health and pools
#[derive(Debug, Clone, Serialize)]
pub struct WatchdogStatus {
    pub health: HealthSnapshot,
    pub pools: BTreeMap<String, PoolStatus>,
}

/// Health-driven recovery orchestrator
pub struct TunnelWatchdog {
    config: WatchdogConfig,
    lifecycle: Arc<dyn TunnelLifecycle>,
    forwarder: Arc<dyn PortForwarder>,
    source: Arc<dyn ConfigSource>,
    pools: Arc<ConnectionPoolManager>,
    monitor: HealthMonitor,
    backoff: RecoveryBackoff,
    cancel: CancellationToken,
}

impl TunnelWatchdog {
    /// Create a watchdog. `config` is expected to be validated already.
    pub fn new(
        config: WatchdogConfig,
        collaborators: Collaborators,
        pools: Arc<ConnectionPoolManager>,
    ) -> Self {
        let monitor = HealthMonitor::new(
            collaborators.probe,
            config.failure_threshold,
            config.probe_timeout,
        );
        let backoff = RecoveryBackoff::new(config.recovery_backoff.clone());

        Self {
            config,
            lifecycle: collaborators.lifecycle,
            forwarder: collaborators.forwarder,
            source: collaborators.source,
            pools,
            monitor,
            backoff,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// A handle that can stop this watchdog from another task
    pub fn handle(&self) -> WatchdogHandle {
        WatchdogHandle {
            cancel: self.cancel.clone(),
        }
    }

    /// Signal the loop to stop
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    pub fn pools(&self) -> &Arc<ConnectionPoolManager> {
        &self.pools
    }

    /// Health records and pool status
    pub fn status(&self) -> WatchdogStatus {
        WatchdogStatus {
            health: self.monitor.snapshot(),
            pools: self.pools.get_all_status(),
        }
    }

    /// Run until stopped.
    ///
    /// An iteration that fails is logged and retried after `error_backoff`;
    /// nothing short of cancellation ends the loop.
    pub async fn run(&mut self) {
        let cancel = self.cancel.clone();

        tracing::info!(
            "Starting tunnel watchdog (check interval: {:?}, failure threshold: {})",
            self.config.check_interval,
            self.config.failure_threshold
        );

        while !cancel.is_cancelled() {
            let wait = match self.run_once().await {
                Ok(_) => self.config.check_interval,
                Err(e) => {
                    tracing::error!("Watchdog iteration failed: {}", e);
                    self.config.error_backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => break,
            }
        }

        tracing::info!("Tunnel watchdog stopped");
    }

    /// One full iteration: health checks followed by recovery when needed
    pub async fn run_once(&mut self) -> Result<CycleReport, WatchdogError> {
        let tunnels = self.check_health().await?;

        let (tunnels_needed, ports_needed) = self.monitor.get_recovery_needed();
        let mut report = CycleReport {
            tunnels_checked: tunnels.len(),
            ports_checked: tunnels.iter().map(|t| t.forwarded_ports.len()).sum(),
            tunnels_needing_recovery: tunnels_needed.clone(),
            ports_needing_recovery: ports_needed.clone(),
            recovery: None,
        };

        if tunnels_needed.is_empty() && ports_needed.is_empty() {
            return Ok(report);
        }

        tracing::warn!(
            "Recovery needed - Tunnels: {:?}, Ports: {:?}",
            tunnels_needed,
            ports_needed
        );

        report.recovery = Some(self.perform_recovery(&tunnels, &tunnels_needed).await);
        Ok(report)
    }

    /// Read the inventory and probe every configured tunnel and port.
    ///
    /// Returns the configured tunnels that were checked. No recovery happens
    /// here.
    pub async fn check_health(&mut self) -> Result<Vec<TunnelConfig>, WatchdogError> {
        let all = self.source.list_tunnels()?;
        let total = all.len();
        let tunnels: Vec<TunnelConfig> = all.into_iter().filter(|t| t.is_configured()).collect();
        if tunnels.len() < total {
            tracing::debug!(
                "Skipping {} unconfigured tunnel(s)",
                total - tunnels.len()
            );
        }

        self.forget_unmanaged(&tunnels);
        self.setup_connection_pooling(&tunnels);

        self.monitor.check_all_tunnel_health(&tunnels).await;
        let ports: Vec<u16> = tunnels
            .iter()
            .flat_map(|t| t.forwarded_ports.iter().copied())
            .collect();
        self.monitor.check_all_port_health(&ports).await;

        tracing::debug!("{}", self.monitor.health_report());
        Ok(tunnels)
    }

    /// Make sure every configured tunnel has a connection pool
    fn setup_connection_pooling(&self, tunnels: &[TunnelConfig]) {
        for tunnel in tunnels {
            let size = tunnel.pool_size.unwrap_or(self.config.pool.default_size);
            self.pools.get_pool(&tunnel.name, size);
        }
    }

    /// Drop health, backoff and pools of tunnels and ports that are gone
    fn forget_unmanaged(&mut self, tunnels: &[TunnelConfig]) {
        let names: HashSet<&str> = tunnels.iter().map(|t| t.name.as_str()).collect();
        let ports: HashSet<u16> = tunnels
            .iter()
            .flat_map(|t| t.forwarded_ports.iter().copied())
            .collect();

        for name in self.monitor.tracked_tunnels() {
            if !names.contains(name.as_str()) {
                tracing::info!("Tunnel '{}' is no longer configured", name);
                self.monitor.clear_tunnel_health(&name);
            }
        }
        for port in self.monitor.tracked_ports() {
            if !ports.contains(&port) {
                tracing::info!("Port {} is no longer forwarded", port);
                self.monitor.clear_port_health(port);
            }
        }

        self.backoff.retain(|entity| match entity {
            MonitoredEntity::Tunnel(name) => names.contains(name.as_str()),
            MonitoredEntity::Port(port) => ports.contains(port),
        });

        for name in self.pools.tunnel_names() {
            if !names.contains(name.as_str()) {
                self.pools.remove_pool(&name);
            }
        }
    }

    /// Sleep unless stopped first. Returns false when stopped.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancel.cancelled() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use vortex_core::{ActionOutcome, ConfigError};

    struct AllUp;

    #[async_trait]
    impl HealthProbe for AllUp {
        async fn interface_up(&self, _interface: &str) -> bool {
            true
        }
        async fn tunnel_active(&self, _tunnel_id: u32) -> bool {
            true
        }
        async fn port_listening(&self, _port: u16) -> bool {
            true
        }
    }

    struct NoOp;

    #[async_trait]
    impl TunnelLifecycle for NoOp {
        async fn delete(&self, _tunnel: &TunnelConfig) -> ActionOutcome {
            ActionOutcome::success("")
        }
        async fn create(&self, _tunnel: &TunnelConfig) -> ActionOutcome {
            ActionOutcome::success("")
        }
    }

    #[async_trait]
    impl PortForwarder for NoOp {
        async fn remove(&self, _tunnel: &TunnelConfig, _port: u16) -> ActionOutcome {
            ActionOutcome::success("")
        }
        async fn create(&self, _tunnel: &TunnelConfig, _port: u16) -> ActionOutcome {
            ActionOutcome::success("")
        }
    }

    struct Inventory(Mutex<Result<Vec<TunnelConfig>, String>>);

    impl ConfigSource for Inventory {
        fn list_tunnels(&self) -> Result<Vec<TunnelConfig>, ConfigError> {
            self.0
                .lock()
                .unwrap()
                .clone()
                .map_err(ConfigError::Invalid)
        }
    }

    fn watchdog(inventory: Arc<Inventory>) -> TunnelWatchdog {
        let collaborators = Collaborators {
            probe: Arc::new(AllUp),
            lifecycle: Arc::new(NoOp),
            forwarder: Arc::new(NoOp),
            source: inventory,
        };
        TunnelWatchdog::new(
            WatchdogConfig::default(),
            collaborators,
            Arc::new(ConnectionPoolManager::default()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_cycle_has_no_recovery() {
        let inventory = Arc::new(Inventory(Mutex::new(Ok(vec![
            TunnelConfig::new("a", 1, "l2tpeth0").with_ports([80, 443]),
            TunnelConfig {
                name: "pending".into(),
                ..Default::default()
            },
        ]))));
        let mut watchdog = watchdog(inventory);

        let report = watchdog.run_once().await.unwrap();
        assert_eq!(report.tunnels_checked, 1);
        assert_eq!(report.ports_checked, 2);
        assert!(report.recovery.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pools_follow_inventory() {
        let inventory = Arc::new(Inventory(Mutex::new(Ok(vec![
            TunnelConfig::new("a", 1, "l2tpeth0"),
            TunnelConfig {
                pool_size: Some(3),
                ..TunnelConfig::new("b", 2, "l2tpeth1")
            },
        ]))));
        let mut watchdog = watchdog(Arc::clone(&inventory));

        watchdog.run_once().await.unwrap();
        assert_eq!(watchdog.pools().existing_pool("a").unwrap().pool_size(), 8);
        assert_eq!(watchdog.pools().existing_pool("b").unwrap().pool_size(), 3);

        *inventory.0.lock().unwrap() = Ok(vec![TunnelConfig::new("b", 2, "l2tpeth1")]);
        watchdog.run_once().await.unwrap();
        assert!(watchdog.pools().existing_pool("a").is_none());
        assert!(watchdog.monitor().tunnel_health("a").is_none());
        assert_eq!(watchdog.status().pools.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inventory_error_surfaces_from_iteration() {
        let inventory = Arc::new(Inventory(Mutex::new(Err("broken".into()))));
        let mut watchdog = watchdog(inventory);

        let err = watchdog.run_once().await.unwrap_err();
        assert!(matches!(err, WatchdogError::Config(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_run() {
        let inventory = Arc::new(Inventory(Mutex::new(Ok(vec![]))));
        let mut watchdog = watchdog(inventory);
        let handle = watchdog.handle();

        let task = tokio::spawn(async move {
            watchdog.run().await;
        });
        tokio::time::sleep(Duration::from_secs(95)).await;
        handle.stop();

        task.await.unwrap();
        assert!(handle.is_stopped());
    }
}
