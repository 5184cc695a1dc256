//! Health snapshot records and the failure-count state machine

use serde::Serialize;

use vortex_core::time::current_time_millis;

/// Current health of one tunnel or port
///
/// Each check replaces the previous record; nothing is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: String,
    /// Time of the check (ms since UNIX epoch)
    pub last_check: u64,
    /// Consecutive failed checks; 0 while healthy
    pub failure_count: u32,
}

impl HealthStatus {
    /// Derive the next record from the previous one and a probe result.
    ///
    /// A healthy result resets the streak. A failure starts a streak at 1,
    /// or extends an existing one by 1.
    pub fn observe(previous: Option<&HealthStatus>, ok: bool, message: impl Into<String>) -> Self {
        let failure_count = match (ok, previous) {
            (true, _) => 0,
            (false, Some(prev)) if !prev.healthy => prev.failure_count.saturating_add(1),
            (false, _) => 1,
        };

        Self {
            healthy: ok,
            message: message.into(),
            last_check: current_time_millis(),
            failure_count,
        }
    }

    /// Check mark for reports
    pub fn mark(&self) -> &'static str {
        if self.healthy {
            "✓"
        } else {
            "✗"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(outcomes: &[bool]) -> Vec<u32> {
        let mut current: Option<HealthStatus> = None;
        outcomes
            .iter()
            .map(|&ok| {
                let next = HealthStatus::observe(current.as_ref(), ok, "");
                let count = next.failure_count;
                current = Some(next);
                count
            })
            .collect()
    }

    #[test]
    fn test_fresh_failures_count_up() {
        assert_eq!(run(&[false, false, false]), vec![1, 2, 3]);
    }

    #[test]
    fn test_success_resets_immediately() {
        assert_eq!(
            run(&[false, false, true, false, true, true, false, false]),
            vec![1, 2, 0, 1, 0, 0, 1, 2]
        );
    }

    #[test]
    fn test_fresh_success_is_zero() {
        assert_eq!(run(&[true]), vec![0]);
    }

    #[test]
    fn test_alternating_never_exceeds_one() {
        let outcomes: Vec<bool> = (0..50).map(|i| i % 2 == 0).collect();
        assert!(run(&outcomes).iter().all(|&c| c <= 1));
    }

    #[test]
    fn test_observe_keeps_message() {
        let status = HealthStatus::observe(None, false, "Port 80: NOT LISTENING");
        assert!(!status.healthy);
        assert_eq!(status.message, "Port 80: NOT LISTENING");
        assert_eq!(status.mark(), "✗");
        assert!(status.last_check > 0);
    }
}
