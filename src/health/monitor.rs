//! Monitor loop
//!
//! Drives the retry coordinator on a fixed interval until the shutdown
//! token fires, keeping the per-target state and notifying observers after
//! every tick.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::observer::CheckObserver;
use super::result::CheckStatus;
use super::retry::{sleep_or_cancel, Probe, RetryCoordinator, RetryOutcome};
use super::state::{TargetHealth, Transition};

/// Lifecycle of the monitor loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Probing,
    Sleeping,
    ShuttingDown,
}

/// How a monitor run ended, mapped onto process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    Success,
    Failure,
    Interrupted,
}

impl MonitorExit {
    pub fn code(self) -> u8 {
        match self {
            MonitorExit::Success => 0,
            MonitorExit::Failure => 1,
            MonitorExit::Interrupted => 130,
        }
    }
}

/// Periodic health monitor for one target
pub struct Monitor {
    probe: Arc<dyn Probe>,
    coordinator: RetryCoordinator,
    interval: Duration,
    database: String,
    addr: String,
    observers: Vec<Arc<dyn CheckObserver>>,
    health: Mutex<TargetHealth>,
    state: Mutex<MonitorState>,
}

impl Monitor {
    pub fn new(probe: Arc<dyn Probe>, coordinator: RetryCoordinator, interval: Duration) -> Self {
        Self {
            probe,
            coordinator,
            interval,
            database: String::new(),
            addr: String::new(),
            observers: Vec::new(),
            health: Mutex::new(TargetHealth::new()),
            state: Mutex::new(MonitorState::Idle),
        }
    }

    /// Name the target in log fields
    pub fn with_target(mut self, database: impl Into<String>, addr: impl Into<String>) -> Self {
        self.database = database.into();
        self.addr = addr.into();
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn CheckObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn state(&self) -> MonitorState {
        *self.state.lock()
    }

    pub fn ticks(&self) -> u64 {
        self.health.lock().ticks()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.health.lock().consecutive_failures()
    }

    pub fn last_status(&self) -> Option<CheckStatus> {
        self.health.lock().last_status()
    }

    /// Run a single tick and map its verdict to an exit status
    pub async fn run_once(&self, shutdown: &CancellationToken) -> MonitorExit {
        let exit = if shutdown.is_cancelled() {
            MonitorExit::Interrupted
        } else {
            let outcome = self.tick(shutdown).await;
            if outcome.was_interrupted() {
                MonitorExit::Interrupted
            } else if outcome.is_success() {
                MonitorExit::Success
            } else {
                MonitorExit::Failure
            }
        };

        self.set_state(MonitorState::ShuttingDown);
        exit
    }

    /// Tick every interval until `shutdown` fires
    pub async fn run(&self, shutdown: &CancellationToken) -> MonitorExit {
        info!(
            database = %self.database,
            addr = %self.addr,
            interval_secs = self.interval.as_secs(),
            "Starting database monitor"
        );

        while !shutdown.is_cancelled() {
            let outcome = self.tick(shutdown).await;
            if outcome.was_interrupted() {
                break;
            }

            self.set_state(MonitorState::Sleeping);
            debug!(
                next_check_secs = self.interval.as_secs(),
                "Waiting for next health check"
            );
            if !sleep_or_cancel(self.interval, shutdown).await {
                break;
            }
        }

        self.set_state(MonitorState::ShuttingDown);
        info!(ticks = self.ticks(), "Database monitor stopped");
        MonitorExit::Success
    }

    async fn tick(&self, shutdown: &CancellationToken) -> RetryOutcome {
        self.set_state(MonitorState::Probing);
        let outcome = self
            .coordinator
            .run_with_retry(self.probe.as_ref(), shutdown)
            .await;

        if !outcome.was_interrupted() {
            self.settle(&outcome);
        }
        outcome
    }

    /// Update state, log edges and notify observers for a terminal verdict
    fn settle(&self, outcome: &RetryOutcome) {
        let status = outcome.result.status();
        let (transition, tick, consecutive_failures) = {
            let mut health = self.health.lock();
            let transition = health.record(status);
            (transition, health.ticks(), health.consecutive_failures())
        };

        match transition {
            Transition::Regressed => warn!(
                database = %self.database,
                addr = %self.addr,
                error_code = outcome.result.error_code().map(|c| c.as_str()).unwrap_or_default(),
                "Database became unreachable"
            ),
            Transition::Recovered { failed_ticks } => info!(
                database = %self.database,
                addr = %self.addr,
                failed_ticks,
                "Database recovered after {} failed checks",
                failed_ticks
            ),
            Transition::Unchanged => {}
        }

        debug!(
            tick,
            attempts = outcome.attempts,
            status = status.as_str(),
            consecutive_failures,
            "Tick complete"
        );

        for observer in &self.observers {
            observer.on_check(outcome);
            if status == CheckStatus::Failure {
                observer.on_failure(outcome);
            }
            if let Transition::Recovered { failed_ticks } = transition {
                observer.on_recovery(outcome, failed_ticks);
            }
        }
    }

    fn set_state(&self, state: MonitorState) {
        *self.state.lock() = state;
    }
}
