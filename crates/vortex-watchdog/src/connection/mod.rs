//! Connection pooling

mod manager;
mod metrics;
mod pool;

pub use manager::ConnectionPoolManager;
pub use metrics::ConnectionMetrics;
pub use pool::{Connection, ConnectionId, ConnectionPool, PoolStats, PoolStatus};
