//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a pooled connection
///
/// Connections are never removed from their pool, only moved to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Connection is available for selection
    Active,
    /// Connection has been closed
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Active => write!(f, "active"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// An entity whose health the watchdog tracks
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MonitoredEntity {
    /// A tunnel, by name
    Tunnel(String),
    /// A forwarded port, by number
    Port(u16),
}

impl fmt::Display for MonitoredEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitoredEntity::Tunnel(name) => write!(f, "tunnel '{}'", name),
            MonitoredEntity::Port(port) => write!(f, "port {}", port),
        }
    }
}

/// Result of an external action (tunnel create/delete, forward add/remove)
///
/// A failed action is a normal value, not an error: the watchdog logs it and
/// retries on a later cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Whether the action succeeded
    pub ok: bool,
    /// Free-text diagnostics from the collaborator
    pub message: String,
}

impl ActionOutcome {
    /// A successful outcome
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    /// A failed outcome
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }

    /// True if the action failed only because its target was already gone.
    ///
    /// Teardown steps that report e.g. "does not exist" leave the host in
    /// the state the caller wanted.
    pub fn failed_as_absent(&self, marker: &str) -> bool {
        !self.ok && self.message.contains(marker)
    }
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.ok { "ok" } else { "failed" };
        if self.message.is_empty() {
            write!(f, "{}", verdict)
        } else {
            write!(f, "{}: {}", verdict, self.message)
        }
    }
}
