//! Recovery cycle

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;

use vortex_core::config::TunnelConfig;
use vortex_core::{ActionOutcome, MonitoredEntity};

use super::TunnelWatchdog;

/// Delete failure that means the tunnel was already gone
const TUNNEL_ABSENT: &str = "does not exist";

/// Remove failure that means the forward was already gone
const FORWARD_ABSENT: &str = "not in forwarded list";

/// What a recovery cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Entities recreated successfully
    pub recovered: Vec<MonitoredEntity>,
    /// Entities whose recreation failed
    pub failed: Vec<MonitoredEntity>,
    /// Entities held back by recovery backoff
    pub deferred: Vec<MonitoredEntity>,
    /// Entities left untouched because the watchdog was stopped
    pub not_attempted: Vec<MonitoredEntity>,
    /// True if the cycle was cut short by a stop signal
    pub interrupted: bool,
}

impl RecoveryReport {
    fn log_interrupted(&self) {
        tracing::warn!(
            "Recovery cycle interrupted by shutdown - recovered: {:?}, failed: {:?}, not attempted: {:?}",
            self.recovered,
            self.failed,
            self.not_attempted
        );
    }
}

/// Await an external action, turning expiry into a failed outcome
async fn bounded<F>(timeout: Duration, what: &str, action: F) -> ActionOutcome
where
    F: Future<Output = ActionOutcome>,
{
    match tokio::time::timeout(timeout, action).await {
        Ok(outcome) => outcome,
        Err(_) => ActionOutcome::failure(format!("{} timed out after {:?}", what, timeout)),
    }
}

impl TunnelWatchdog {
    /// Recover eligible tunnels, then every unhealthy forwarded port, one at
    /// a time.
    ///
    /// Ports are taken by their last check, not by the failure threshold:
    /// once a cycle runs, any forward that is currently down is rebuilt.
    /// `tunnels` fixes the order: entities are recovered in inventory order.
    pub(super) async fn perform_recovery(
        &mut self,
        tunnels: &[TunnelConfig],
        tunnels_needed: &[String],
    ) -> RecoveryReport {
        let tunnel_set: HashSet<&str> = tunnels_needed.iter().map(String::as_str).collect();

        let mut queue: Vec<(&TunnelConfig, MonitoredEntity)> = tunnels
            .iter()
            .filter(|t| tunnel_set.contains(t.name.as_str()))
            .map(|t| (t, MonitoredEntity::Tunnel(t.name.clone())))
            .collect();
        for tunnel in tunnels {
            for &port in &tunnel.forwarded_ports {
                let unhealthy = self
                    .monitor
                    .port_health(port)
                    .is_some_and(|status| !status.healthy);
                if unhealthy {
                    queue.push((tunnel, MonitoredEntity::Port(port)));
                }
            }
        }

        let mut report = RecoveryReport::default();

        if !self.pause(self.config.pre_recovery_delay).await {
            report.not_attempted = queue.into_iter().map(|(_, e)| e).collect();
            report.interrupted = true;
            report.log_interrupted();
            return report;
        }

        let mut pending = queue.into_iter();
        while let Some((tunnel, entity)) = pending.next() {
            if self.cancel.is_cancelled() {
                report.not_attempted.push(entity);
                report
                    .not_attempted
                    .extend(pending.by_ref().map(|(_, e)| e));
                report.interrupted = true;
                break;
            }

            if let Some(remaining) = self.backoff.remaining(&entity) {
                tracing::info!(
                    "Skipping recovery of {} (backoff, {:?} remaining)",
                    entity,
                    remaining
                );
                report.deferred.push(entity);
                continue;
            }

            let recovered = match &entity {
                MonitoredEntity::Tunnel(_) => self.recover_tunnel(tunnel).await,
                MonitoredEntity::Port(port) => self.recover_port(tunnel, *port).await,
            };

            if recovered {
                self.backoff.record_success(&entity);
                report.recovered.push(entity.clone());
            } else {
                self.backoff.record_failure(&entity);
                report.failed.push(entity.clone());
            }

            if matches!(entity, MonitoredEntity::Tunnel(_))
                && !self.pause(self.config.inter_tunnel_delay).await
            {
                report
                    .not_attempted
                    .extend(pending.by_ref().map(|(_, e)| e));
                report.interrupted = true;
                break;
            }
        }

        if report.interrupted {
            report.log_interrupted();
        } else {
            tracing::info!(
                "Recovery cycle complete - recovered: {}, failed: {}, deferred: {}",
                report.recovered.len(),
                report.failed.len(),
                report.deferred.len()
            );
        }
        report
    }

    /// Tear a tunnel down and recreate it
    async fn recover_tunnel(&self, tunnel: &TunnelConfig) -> bool {
        tracing::info!("Recovering tunnel: {}", tunnel.name);
        let timeout = self.config.action_timeout;

        let deleted = bounded(timeout, "Tunnel delete", self.lifecycle.delete(tunnel)).await;
        if deleted.ok {
            tracing::debug!("Deleted tunnel '{}': {}", tunnel.name, deleted.message);
        } else if !deleted.failed_as_absent(TUNNEL_ABSENT) {
            tracing::warn!("Failed to delete tunnel '{}': {}", tunnel.name, deleted.message);
        }

        tokio::time::sleep(self.config.recovery_delay).await;

        let created = bounded(timeout, "Tunnel create", self.lifecycle.create(tunnel)).await;
        if created.ok {
            tracing::info!("Tunnel '{}' recovered successfully", tunnel.name);
            true
        } else {
            tracing::error!(
                "Failed to recover tunnel '{}': {}",
                tunnel.name,
                created.message
            );
            false
        }
    }

    /// Remove and re-add a port forward; clears the port's health on success
    async fn recover_port(&mut self, tunnel: &TunnelConfig, port: u16) -> bool {
        tracing::info!("Recovering port forward: {} (tunnel '{}')", port, tunnel.name);
        let timeout = self.config.action_timeout;

        let removed = bounded(
            timeout,
            "Forward remove",
            self.forwarder.remove(tunnel, port),
        )
        .await;
        if !removed.ok && !removed.failed_as_absent(FORWARD_ABSENT) {
            tracing::warn!("Failed to remove forward for port {}: {}", port, removed.message);
        }

        tokio::time::sleep(self.config.port_settle_delay).await;

        let created = bounded(
            timeout,
            "Forward create",
            self.forwarder.create(tunnel, port),
        )
        .await;
        if created.ok {
            tracing::info!("Port {} forward recovered successfully", port);
            self.monitor.clear_port_health(port);
            true
        } else {
            tracing::error!("Failed to recover port {}: {}", port, created.message);
            false
        }
    }
}
