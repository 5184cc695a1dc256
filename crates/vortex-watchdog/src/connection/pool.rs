//! Chaotic connection pool
//!
//! A pool of logical connections for one tunnel. Selection is deliberately
//! randomized: a reused connection is picked uniformly from the active set
//! rather than by recency, and the pool occasionally overshoots its nominal
//! size, so the access pattern seen on the wire carries no fixed rhythm.
//!
//! # Locking
//!
//! All state, including the random source, sits behind one mutex. Every
//! public method holds it for its full duration, so counters are never
//! observed mid-update and random draws stay in step with the decisions
//! that consume them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use serde::Serialize;

use vortex_core::random::{self, RandomSource};
use vortex_core::types::ConnectionState;

use super::metrics::ConnectionMetrics;

/// Connection identifier, unique within a pool and never reused
pub type ConnectionId = u64;

/// Chance that a full pool hands out an existing connection instead of cycling one
const OVERFLOW_REUSE_PROBABILITY: f64 = 0.5;

/// Chance that a pattern step opens a fresh connection
const PATTERN_NEW_CONNECTION_PROBABILITY: f64 = 0.3;

/// Chance that a pattern step uses the long delay range
const PATTERN_LONG_DELAY_PROBABILITY: f64 = 0.1;

/// Regular inter-request delay range (ms, inclusive)
const PATTERN_DELAY_MS: (u64, u64) = (5, 500);

/// Long inter-request delay range (ms, inclusive)
const PATTERN_LONG_DELAY_MS: (u64, u64) = (1000, 5000);

/// A logical connection owned by a pool
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub state: ConnectionState,
    pub created_at: Instant,
    /// Last time this connection was handed out; drives idle eviction
    pub last_activity: Instant,
    pub metrics: ConnectionMetrics,
}

impl Connection {
    fn new(id: ConnectionId) -> Self {
        let now = Instant::now();
        Self {
            id,
            state: ConnectionState::Active,
            created_at: now,
            last_activity: now,
            metrics: ConnectionMetrics::new(),
        }
    }

    /// Whether the connection can still be selected
    pub fn is_active(&self) -> bool {
        self.state == ConnectionState::Active
    }
}

/// Aggregate pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total_created: u64,
    pub total_reused: u64,
    pub total_closed: u64,
    pub current_active: usize,
}

/// Read-only snapshot of a pool
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub pool_size: usize,
    pub active_connections: usize,
    pub closed_connections: usize,
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
    pub total_packets: u64,
    /// Percentage of hand-outs that reused a connection
    pub reuse_rate: f64,
    pub stats: PoolStats,
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Connection Pool Status ===")?;
        writeln!(f)?;
        writeln!(f, "CONFIGURATION:")?;
        writeln!(f, "  Pool size: {}", self.pool_size)?;
        writeln!(
            f,
            "  Active connections: {}/{}",
            self.active_connections, self.pool_size
        )?;
        writeln!(f, "  Closed connections: {}", self.closed_connections)?;
        writeln!(f)?;
        writeln!(f, "STATISTICS:")?;
        writeln!(f, "  Total created: {}", self.stats.total_created)?;
        writeln!(f, "  Total reused: {}", self.stats.total_reused)?;
        writeln!(f, "  Total closed: {}", self.stats.total_closed)?;
        writeln!(f, "  Reuse rate: {:.1}%", self.reuse_rate)?;
        writeln!(f)?;
        writeln!(f, "TRAFFIC:")?;
        writeln!(f, "  Total bytes sent: {}", self.total_bytes_sent)?;
        writeln!(f, "  Total bytes received: {}", self.total_bytes_received)?;
        write!(f, "  Total packets: {}", self.total_packets)
    }
}

/// Immutable sizing policy
#[derive(Debug, Clone, Copy)]
struct Policy {
    pool_size: usize,
    reuse_probability: f64,
}

/// Everything guarded by the pool lock
struct PoolState {
    next_id: ConnectionId,
    connections: BTreeMap<ConnectionId, Connection>,
    stats: PoolStats,
    rng: Box<dyn RandomSource>,
}

impl PoolState {
    fn active_ids(&self) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| c.is_active())
            .map(|c| c.id)
            .collect()
    }

    fn refresh_active(&mut self) {
        self.stats.current_active = self.connections.values().filter(|c| c.is_active()).count();
    }

    fn create(&mut self) -> ConnectionId {
        let id = self.next_id;
        self.next_id += 1;

        self.connections.insert(id, Connection::new(id));
        self.stats.total_created += 1;
        self.refresh_active();

        tracing::debug!(connection_id = id, "Created connection");
        id
    }

    fn close(&mut self, id: ConnectionId) -> bool {
        let Some(conn) = self.connections.get_mut(&id) else {
            return false;
        };

        if conn.is_active() {
            conn.state = ConnectionState::Closed;
            // Counts active->closed transitions, not close calls
            self.stats.total_closed += 1;
            self.refresh_active();
            tracing::debug!(connection_id = id, "Closed connection");
        }
        true
    }

    fn pick_active(&mut self, active: &[ConnectionId]) -> ConnectionId {
        active[self.rng.next_index(active.len())]
    }

    /// Oldest-idle active connection; ties go to the lowest id
    fn oldest_active(&self) -> Option<ConnectionId> {
        self.connections
            .values()
            .filter(|c| c.is_active())
            .min_by_key(|c| (c.last_activity, c.id))
            .map(|c| c.id)
    }

    fn select(&mut self, policy: Policy, force_new: bool) -> ConnectionId {
        let active = self.active_ids();

        if !force_new && !active.is_empty() && self.rng.next_f64() < policy.reuse_probability {
            let id = self.pick_active(&active);
            if let Some(conn) = self.connections.get_mut(&id) {
                conn.last_activity = Instant::now();
                conn.metrics.reuses += 1;
                tracing::debug!(
                    connection_id = id,
                    reuses = conn.metrics.reuses,
                    "Reusing connection"
                );
            }
            self.stats.total_reused += 1;
            return id;
        }

        if active.len() < policy.pool_size {
            return self.create();
        }

        // At or over the nominal size: sometimes overshoot, otherwise cycle
        // out the connection that has been idle longest.
        if self.rng.next_f64() < OVERFLOW_REUSE_PROBABILITY && !active.is_empty() {
            return self.pick_active(&active);
        }

        if let Some(oldest) = self.oldest_active() {
            self.close(oldest);
        }
        self.create()
    }

    fn pattern_delay(&mut self) -> u64 {
        let mut delay = self
            .rng
            .next_in_range(PATTERN_DELAY_MS.0, PATTERN_DELAY_MS.1);
        if self.rng.next_f64() < PATTERN_LONG_DELAY_PROBABILITY {
            delay = self
                .rng
                .next_in_range(PATTERN_LONG_DELAY_MS.0, PATTERN_LONG_DELAY_MS.1);
        }
        delay
    }

    fn status(&self, policy: Policy) -> PoolStatus {
        let active_connections = self.connections.values().filter(|c| c.is_active()).count();
        let closed_connections = self.connections.len() - active_connections;

        let (bytes_sent, bytes_received, packets) =
            self.connections
                .values()
                .fold((0u64, 0u64, 0u64), |(s, r, p), c| {
                    (
                        s + c.metrics.bytes_sent,
                        r + c.metrics.bytes_received,
                        p + c.metrics.total_packets(),
                    )
                });

        let handed_out = (self.stats.total_created + self.stats.total_reused).max(1);
        let reuse_rate = self.stats.total_reused as f64 / handed_out as f64 * 100.0;

        PoolStatus {
            pool_size: policy.pool_size,
            active_connections,
            closed_connections,
            total_bytes_sent: bytes_sent,
            total_bytes_received: bytes_received,
            total_packets: packets,
            reuse_rate,
            stats: self.stats,
        }
    }
}

/// Thread-safe pool of logical connections for one tunnel
pub struct ConnectionPool {
    policy: Policy,
    state: Mutex<PoolState>,
}

impl ConnectionPool {
    /// Create a pool backed by an entropy-seeded random source
    pub fn new(pool_size: usize, reuse_probability: f64) -> Self {
        Self::with_random(pool_size, reuse_probability, random::default_source())
    }

    /// Create a pool with an explicit random source.
    ///
    /// `pool_size` is raised to at least 1 and `reuse_probability` clamped
    /// into `[0, 1]`.
    pub fn with_random(
        pool_size: usize,
        reuse_probability: f64,
        rng: Box<dyn RandomSource>,
    ) -> Self {
        let reuse_probability = if reuse_probability.is_nan() {
            0.0
        } else {
            reuse_probability.clamp(0.0, 1.0)
        };

        Self {
            policy: Policy {
                pool_size: pool_size.max(1),
                reuse_probability,
            },
            state: Mutex::new(PoolState {
                next_id: 0,
                connections: BTreeMap::new(),
                stats: PoolStats::default(),
                rng,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Every update completes before the guard drops, so a poisoned
        // state is still consistent.
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Connection pool lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Nominal number of active connections
    pub fn pool_size(&self) -> usize {
        self.policy.pool_size
    }

    /// Probability of reusing an active connection
    pub fn reuse_probability(&self) -> f64 {
        self.policy.reuse_probability
    }

    /// Open a new connection and return its id
    pub fn create_connection(&self) -> ConnectionId {
        self.lock().create()
    }

    /// Mark a connection closed.
    ///
    /// Returns whether the id belongs to this pool. Closing an already closed
    /// connection reports `true` again but is not counted twice.
    pub fn close_connection(&self, id: ConnectionId) -> bool {
        self.lock().close(id)
    }

    /// Hand out a connection, reused or new, by chaotic selection.
    ///
    /// With `force_new` the reuse draw is skipped; the pool still cycles a
    /// connection out if it is already at its nominal size.
    pub fn get_connection(&self, force_new: bool) -> ConnectionId {
        self.lock().select(self.policy, force_new)
    }

    /// Record traffic on a connection. Unknown ids are ignored.
    pub fn update_metrics(&self, id: ConnectionId, bytes_sent: u64, bytes_received: u64) {
        if let Some(conn) = self.lock().connections.get_mut(&id) {
            conn.metrics.record_traffic(bytes_sent, bytes_received);
        }
    }

    /// Plan a chaotic request sequence of `count` steps.
    ///
    /// Each step is `(connection_id, delay_ms)`. Steps open a fresh
    /// connection 30% of the time and otherwise go through
    /// [`get_connection`](Self::get_connection). Delays are uniform in
    /// 5..=500 ms, replaced 10% of the time by 1000..=5000 ms.
    ///
    /// The plan is generated under a single lock acquisition.
    pub fn get_chaotic_connection_pattern(&self, count: usize) -> Vec<(ConnectionId, u64)> {
        let mut state = self.lock();
        let mut pattern = Vec::with_capacity(count);

        for _ in 0..count {
            let id = if state.rng.next_f64() < PATTERN_NEW_CONNECTION_PROBABILITY {
                state.create()
            } else {
                state.select(self.policy, false)
            };
            let delay = state.pattern_delay();
            pattern.push((id, delay));
        }

        pattern
    }

    /// Snapshot of counters and traffic totals
    pub fn get_pool_status(&self) -> PoolStatus {
        self.lock().status(self.policy)
    }

    /// Human-readable status report
    pub fn status_report(&self) -> String {
        self.get_pool_status().to_string()
    }

    /// Copy of a single connection record
    pub fn connection(&self, id: ConnectionId) -> Option<Connection> {
        self.lock().connections.get(&id).cloned()
    }

    /// Ids of all active connections, ascending
    pub fn active_connections(&self) -> Vec<ConnectionId> {
        self.lock().active_ids()
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("pool_size", &self.policy.pool_size)
            .field("reuse_probability", &self.policy.reuse_probability)
            .finish_non_exhaustive()
    }
}
