//! Watchdog daemon configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;

/// Configuration for the tunnel watchdog daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Interval between health check cycles
    #[serde(with = "duration_secs")]
    pub check_interval: Duration,

    /// Consecutive failed checks before an entity is recovered
    pub failure_threshold: u32,

    /// Pause between detecting a recovery need and acting on it
    #[serde(with = "duration_secs")]
    pub pre_recovery_delay: Duration,

    /// Settle delay between tearing a tunnel down and recreating it
    #[serde(with = "duration_secs")]
    pub recovery_delay: Duration,

    /// Pause after each tunnel recovery before the next one
    #[serde(with = "duration_secs")]
    pub inter_tunnel_delay: Duration,

    /// Settle delay between removing and re-adding a port forward
    #[serde(with = "duration_secs")]
    pub port_settle_delay: Duration,

    /// Pause after a failed iteration before the next attempt
    #[serde(with = "duration_secs")]
    pub error_backoff: Duration,

    /// Upper bound on a single health probe
    #[serde(with = "duration_secs")]
    pub probe_timeout: Duration,

    /// Upper bound on a single recovery action
    #[serde(with = "duration_secs")]
    pub action_timeout: Duration,

    /// Tunnel inventory file, re-read every cycle
    pub tunnels_path: PathBuf,

    /// Optional log file in addition to stderr
    pub log_file: Option<PathBuf>,

    /// Connection pool defaults
    pub pool: PoolConfig,

    /// Backoff between repeated recovery attempts of the same entity.
    /// When absent, an eligible entity is retried every cycle.
    pub recovery_backoff: Option<BackoffConfig>,

    /// Command templates for the shell collaborators
    pub commands: CommandTemplates,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            failure_threshold: 2,
            pre_recovery_delay: Duration::from_secs(2),
            recovery_delay: Duration::from_secs(5),
            inter_tunnel_delay: Duration::from_secs(2),
            port_settle_delay: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(10),
            action_timeout: Duration::from_secs(60),
            tunnels_path: super::default_tunnels_path(),
            log_file: None,
            pool: PoolConfig::default(),
            recovery_backoff: None,
            commands: CommandTemplates::default(),
        }
    }
}

impl WatchdogConfig {
    /// Check value ranges. Called once at load time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.check_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "check_interval must be greater than zero".to_string(),
            ));
        }
        if self.probe_timeout.is_zero() || self.action_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "probe_timeout and action_timeout must be greater than zero".to_string(),
            ));
        }
        self.pool.validate()?;
        if let Some(backoff) = &self.recovery_backoff {
            backoff.validate()?;
        }
        Ok(())
    }
}

/// Connection pool defaults applied to every tunnel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Target number of active connections per tunnel
    pub default_size: usize,

    /// Probability of reusing an active connection (0.0 to 1.0)
    pub reuse_probability: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            default_size: 8,
            reuse_probability: 0.7,
        }
    }
}

impl PoolConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_size == 0 {
            return Err(ConfigError::Invalid(
                "pool.default_size must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reuse_probability) {
            return Err(ConfigError::Invalid(format!(
                "pool.reuse_probability must be within [0, 1], got {}",
                self.reuse_probability
            )));
        }
        Ok(())
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(30),
            max: Duration::from_secs(600),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl BackoffConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "recovery_backoff.multiplier must be a finite number of at least 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Invalid(
                "recovery_backoff.jitter must be within [0, 1]".to_string(),
            ));
        }
        if self.max < self.initial {
            return Err(ConfigError::Invalid(
                "recovery_backoff.max must not be below recovery_backoff.initial".to_string(),
            ));
        }
        Ok(())
    }
}

/// Shell command templates for probes and recovery actions.
///
/// Placeholders: `{name}`, `{tunnel_id}`, `{interface}`, `{port}`.
/// Substituted values are shell-quoted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandTemplates {
    /// Succeeds when the interface is up and has an address
    pub interface_up: String,

    /// Succeeds when the tunnel has an active session
    pub tunnel_active: String,

    /// Succeeds when something listens on the port
    pub port_listening: String,

    /// Tears a tunnel down
    pub tunnel_delete: Option<String>,

    /// Brings a tunnel up with its full setup
    pub tunnel_create: Option<String>,

    /// Removes a port forward
    pub forward_remove: Option<String>,

    /// Adds a port forward
    pub forward_create: Option<String>,
}

impl Default for CommandTemplates {
    fn default() -> Self {
        Self {
            interface_up: "ip -o -4 addr show dev {interface} up | grep -q inet".to_string(),
            tunnel_active: "ip l2tp show tunnel tunnel_id {tunnel_id} | grep -q .".to_string(),
            port_listening: "ss -Htln 'sport = :{port}' | grep -q .".to_string(),
            tunnel_delete: None,
            tunnel_create: None,
            forward_remove: None,
            forward_create: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = WatchdogConfig::default();
        config.validate().unwrap();
        assert_eq!(config.check_interval, Duration::from_secs(30));
        assert_eq!(config.failure_threshold, 2);
        assert!(config.recovery_backoff.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: WatchdogConfig = toml::from_str(
            r#"
            check_interval = 10

            [pool]
            reuse_probability = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.check_interval, Duration::from_secs(10));
        assert_eq!(config.recovery_delay, Duration::from_secs(5));
        assert_eq!(config.pool.default_size, 8);
        assert_eq!(config.pool.reuse_probability, 0.5);
    }

    #[test]
    fn test_reuse_probability_out_of_range() {
        let mut config = WatchdogConfig::default();
        config.pool.reuse_probability = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_check_interval_rejected() {
        let mut config = WatchdogConfig::default();
        config.check_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_recovery_backoff_validation() {
        let mut config = WatchdogConfig::default();
        config.recovery_backoff = Some(BackoffConfig {
            multiplier: 0.5,
            ..BackoffConfig::default()
        });
        assert!(config.validate().is_err());

        config.recovery_backoff = Some(BackoffConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn test_recovery_backoff_rejects_non_finite_multiplier() {
        for multiplier in [f64::INFINITY, f64::NAN] {
            let mut config = WatchdogConfig::default();
            config.recovery_backoff = Some(BackoffConfig {
                multiplier,
                ..BackoffConfig::default()
            });
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }

        let config: WatchdogConfig = toml::from_str(
            r#"
            [recovery_backoff]
            initial = 10
            max = 120
            multiplier = inf
            jitter = 0.0
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_recovery_backoff_from_toml() {
        let config: WatchdogConfig = toml::from_str(
            r#"
            [recovery_backoff]
            initial = 10
            max = 120
            multiplier = 3.0
            jitter = 0.0
            "#,
        )
        .unwrap();

        let backoff = config.recovery_backoff.unwrap();
        assert_eq!(backoff.initial, Duration::from_secs(10));
        assert_eq!(backoff.max, Duration::from_secs(120));
    }
}
