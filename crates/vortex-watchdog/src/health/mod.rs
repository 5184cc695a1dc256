//! Health state machine for tunnels and forwarded ports

mod monitor;
mod status;

pub use monitor::{HealthMonitor, HealthSnapshot};
pub use status::HealthStatus;
