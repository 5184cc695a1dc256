//! External collaborator contracts
//!
//! The watchdog decides *when* to act; these traits are the only way it acts.
//! Implementations own the command syntax and must return within a bounded
//! time, though callers also enforce their own timeouts.

mod action;
mod probe;
mod source;

pub use action::{PortForwarder, TunnelLifecycle};
pub use probe::HealthProbe;
pub use source::ConfigSource;
