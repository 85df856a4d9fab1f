//! Per-target health state carried between ticks
//!
//! Only the tick counter, the consecutive-failure counter and the last
//! known status survive from one tick to the next. Edges between up and
//! down are reported so the monitor can log them once.

use super::result::CheckStatus;

/// Status edge produced by recording a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Same status as the previous tick (or first tick succeeded)
    Unchanged,
    /// First failure after a success
    Regressed,
    /// First success after `failed_ticks` failed ticks
    Recovered { failed_ticks: u32 },
}

/// Health state for the monitored target
#[derive(Debug, Default)]
pub struct TargetHealth {
    ticks: u64,
    consecutive_failures: u32,
    last_status: Option<CheckStatus>,
}

impl TargetHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ticks recorded so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// `None` until the first tick has been recorded
    pub fn last_status(&self) -> Option<CheckStatus> {
        self.last_status
    }

    /// Record the terminal status of one tick
    pub fn record(&mut self, status: CheckStatus) -> Transition {
        self.ticks += 1;
        let previous = self.last_status.replace(status);

        match status {
            CheckStatus::Success => {
                let failed_ticks = std::mem::take(&mut self.consecutive_failures);
                if failed_ticks > 0 {
                    Transition::Recovered { failed_ticks }
                } else {
                    Transition::Unchanged
                }
            }
            CheckStatus::Failure => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if previous == Some(CheckStatus::Success) {
                    Transition::Regressed
                } else {
                    Transition::Unchanged
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_is_unknown() {
        let health = TargetHealth::new();
        assert_eq!(health.ticks(), 0);
        assert_eq!(health.last_status(), None);
        assert_eq!(health.consecutive_failures(), 0);
    }

    #[test]
    fn test_steady_success_has_no_edges() {
        let mut health = TargetHealth::new();
        for _ in 0..3 {
            assert_eq!(health.record(CheckStatus::Success), Transition::Unchanged);
        }
        assert_eq!(health.ticks(), 3);
        assert_eq!(health.last_status(), Some(CheckStatus::Success));
    }

    #[test]
    fn test_regression_reported_once() {
        let mut health = TargetHealth::new();
        health.record(CheckStatus::Success);

        assert_eq!(health.record(CheckStatus::Failure), Transition::Regressed);
        assert_eq!(health.record(CheckStatus::Failure), Transition::Unchanged);
        assert_eq!(health.consecutive_failures(), 2);
        assert_eq!(health.last_status(), Some(CheckStatus::Failure));
    }

    #[test]
    fn test_failures_before_first_success_are_not_a_regression() {
        let mut health = TargetHealth::new();
        assert_eq!(health.record(CheckStatus::Failure), Transition::Unchanged);
        assert_eq!(health.consecutive_failures(), 1);
    }

    #[test]
    fn test_recovery_carries_failed_tick_count() {
        let mut health = TargetHealth::new();
        health.record(CheckStatus::Success);
        for _ in 0..3 {
            health.record(CheckStatus::Failure);
        }

        assert_eq!(
            health.record(CheckStatus::Success),
            Transition::Recovered { failed_ticks: 3 }
        );
        assert_eq!(health.consecutive_failures(), 0);
        assert_eq!(health.ticks(), 5);
    }
}
