//! vortex-watchdog: Health monitoring and recovery daemon for VortexL2 tunnels
//!
//! The watchdog periodically probes every configured tunnel and forwarded
//! port, tracks consecutive failures per entity, and tears down and recreates
//! whatever stays unhealthy. It also owns the per-tunnel connection pools
//! used for chaotic connection selection.

pub mod connection;
pub mod health;
pub mod shell;
pub mod source;
pub mod watchdog;

pub use connection::{ConnectionPool, ConnectionPoolManager};
pub use health::{HealthMonitor, HealthStatus};
pub use shell::ShellCollaborator;
pub use source::{FileConfigSource, StaticConfigSource};
pub use watchdog::{Collaborators, CycleReport, TunnelWatchdog, WatchdogHandle};
