//! Hooks notified after every tick

use super::retry::RetryOutcome;

/// Receives the verdict of every tick, synchronously and in registration order.
///
/// Implementations should return quickly; the next tick waits for them.
pub trait CheckObserver: Send + Sync {
    /// Every tick that reached a verdict
    fn on_check(&self, _outcome: &RetryOutcome) {}

    /// Ticks whose verdict is a failure
    fn on_failure(&self, _outcome: &RetryOutcome) {}

    /// First successful tick after `failed_ticks` failed ones
    fn on_recovery(&self, _outcome: &RetryOutcome, _failed_ticks: u32) {}
}
