//! Per-connection traffic counters

use serde::Serialize;

use vortex_core::time::current_time_millis;

/// Traffic and reuse counters for one pooled connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionMetrics {
    /// Creation time (ms since UNIX epoch)
    pub created_at: u64,
    /// Last traffic update (ms since UNIX epoch)
    pub last_used: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Times the connection was handed out again after creation
    pub reuses: u64,
}

impl ConnectionMetrics {
    /// Fresh counters stamped with the current time
    pub fn new() -> Self {
        let now = current_time_millis();
        Self {
            created_at: now,
            last_used: now,
            packets_sent: 0,
            packets_received: 0,
            bytes_sent: 0,
            bytes_received: 0,
            reuses: 0,
        }
    }

    /// Count one packet per non-zero direction
    pub fn record_traffic(&mut self, bytes_sent: u64, bytes_received: u64) {
        if bytes_sent > 0 {
            self.packets_sent += 1;
            self.bytes_sent += bytes_sent;
        }
        if bytes_received > 0 {
            self.packets_received += 1;
            self.bytes_received += bytes_received;
        }
        self.last_used = current_time_millis();
    }

    /// Packets in both directions
    pub fn total_packets(&self) -> u64 {
        self.packets_sent + self.packets_received
    }
}

impl Default for ConnectionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_traffic_counts_directions_independently() {
        let mut metrics = ConnectionMetrics::new();

        metrics.record_traffic(1200, 0);
        assert_eq!(metrics.packets_sent, 1);
        assert_eq!(metrics.packets_received, 0);
        assert_eq!(metrics.bytes_sent, 1200);

        metrics.record_traffic(100, 300);
        assert_eq!(metrics.packets_sent, 2);
        assert_eq!(metrics.packets_received, 1);
        assert_eq!(metrics.bytes_received, 300);
        assert_eq!(metrics.total_packets(), 3);
    }

    #[test]
    fn test_zero_traffic_only_touches_timestamp() {
        let mut metrics = ConnectionMetrics::new();
        metrics.record_traffic(0, 0);
        assert_eq!(metrics.total_packets(), 0);
        assert!(metrics.last_used >= metrics.created_at);
    }
}
