//! Exponential backoff between repeated recovery attempts

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use vortex_core::config::BackoffConfig;
use vortex_core::random::{self, RandomSource};
use vortex_core::MonitoredEntity;

/// Exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Current delay
    current: Duration,
    /// Maximum delay
    max: Duration,
    /// Multiplier
    multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    jitter: f64,
}

impl ExponentialBackoff {
    /// Create a new backoff from configuration
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.initial, config.max, config.multiplier, config.jitter)
    }

    /// Create a new backoff with custom parameters
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            current: initial,
            max,
            multiplier,
            jitter,
        }
    }

    /// Get the next delay and advance the backoff.
    ///
    /// Products that overflow `Duration` saturate at the configured maximum.
    pub fn next_delay(&mut self, rng: &mut dyn RandomSource) -> Duration {
        let delay = self.current;

        let next = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max);
        self.current = std::cmp::min(next, self.max);

        let jitter_amount = delay.as_secs_f64() * self.jitter * rng.next_f64();
        delay.saturating_add(Duration::try_from_secs_f64(jitter_amount).unwrap_or(Duration::ZERO))
    }
}

/// Backoff state of one entity
#[derive(Debug)]
struct Hold {
    backoff: ExponentialBackoff,
    not_before: Instant,
    failures: u32,
}

/// Per-entity recovery backoff
///
/// Disabled (every entity always ready) when built without a config.
pub struct RecoveryBackoff {
    config: Option<BackoffConfig>,
    holds: HashMap<MonitoredEntity, Hold>,
    /// Jitter draws
    rng: Mutex<Box<dyn RandomSource>>,
}

impl RecoveryBackoff {
    pub fn new(config: Option<BackoffConfig>) -> Self {
        Self::with_random(config, random::default_source())
    }

    /// Create a backoff drawing jitter from `rng`
    pub fn with_random(config: Option<BackoffConfig>, rng: Box<dyn RandomSource>) -> Self {
        Self {
            config,
            holds: HashMap::new(),
            rng: Mutex::new(rng),
        }
    }

    /// Whether `entity` may be recovered now
    pub fn is_ready(&self, entity: &MonitoredEntity) -> bool {
        self.remaining(entity).is_none()
    }

    /// Time left before `entity` may be recovered again, if held
    pub fn remaining(&self, entity: &MonitoredEntity) -> Option<Duration> {
        let hold = self.holds.get(entity)?;
        let now = Instant::now();
        (hold.not_before > now).then(|| hold.not_before - now)
    }

    /// Record a failed recovery; returns the hold applied, if backoff is enabled
    pub fn record_failure(&mut self, entity: &MonitoredEntity) -> Option<Duration> {
        let config = self.config.as_ref()?;
        let hold = self.holds.entry(entity.clone()).or_insert_with(|| Hold {
            backoff: ExponentialBackoff::from_config(config),
            not_before: Instant::now(),
            failures: 0,
        });

        let rng = self.rng.get_mut().unwrap_or_else(PoisonError::into_inner);
        let delay = hold.backoff.next_delay(rng.as_mut());
        let now = Instant::now();
        // Far-future holds are clamped to what the clock can represent
        hold.not_before = now
            .checked_add(delay)
            .unwrap_or_else(|| now + Duration::from_secs(u32::MAX as u64));
        hold.failures += 1;

        tracing::info!(
            "Holding off recovery of {} for {:?} ({} consecutive failed recoveries)",
            entity,
            delay,
            hold.failures
        );
        Some(delay)
    }

    /// Forget the backoff of an entity that recovered
    pub fn record_success(&mut self, entity: &MonitoredEntity) {
        self.holds.remove(entity);
    }

    /// Drop holds of entities no longer managed
    pub fn retain(&mut self, mut keep: impl FnMut(&MonitoredEntity) -> bool) {
        self.holds.retain(|entity, _| keep(entity));
    }

    /// Number of entities currently tracked
    pub fn len(&self) -> usize {
        self.holds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holds.is_empty()
    }
}

impl fmt::Debug for RecoveryBackoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryBackoff")
            .field("config", &self.config)
            .field("held", &self.holds.len())
            .finish()
    }
}
