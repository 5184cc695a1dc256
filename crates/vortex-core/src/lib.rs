//! vortex-core: Core abstractions and configuration for the VortexL2 watchdog
//!
//! This crate provides shared types, collaborator traits, configuration
//! structures and the injectable random source used by the watchdog daemon.

pub mod config;
pub mod error;
pub mod random;
pub mod time;
pub mod traits;
pub mod types;

pub use error::{ConfigError, WatchdogError};
pub use random::RandomSource;
pub use types::{ActionOutcome, ConnectionState, MonitoredEntity};
