//! Retry coordination with backoff
//!
//! Wraps a [`Probe`] and decides, per failed attempt, whether to give up or
//! wait and try again. Waits race the shutdown token so a signal never has to
//! sit out a long backoff.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng as _;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::metrics::MetricsSink;

use super::result::{ErrorCode, HealthCheckResult};

/// Upper bound for a single computed delay
const MAX_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Lower bound for a jittered delay
const MIN_JITTERED_DELAY: Duration = Duration::from_millis(100);

/// Jitter multiplies the nominal delay by a factor drawn from this range
const JITTER_RANGE: std::ops::RangeInclusive<f64> = 0.8..=1.2;

/// Something that performs one health check attempt
#[async_trait]
pub trait Probe: Send + Sync {
    /// Run one attempt. Never fails: every error is a failure result.
    async fn execute(&self) -> HealthCheckResult;
}

/// How the delay grows between retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackoffStrategy {
    /// `base`
    Fixed,
    /// `base * n`
    Linear,
    /// `base * 2^(n-1)`
    #[default]
    Exponential,
}

impl BackoffStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackoffStrategy::Fixed => "fixed",
            BackoffStrategy::Linear => "linear",
            BackoffStrategy::Exponential => "exponential",
        }
    }
}

impl FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(BackoffStrategy::Fixed),
            "linear" => Ok(BackoffStrategy::Linear),
            "exponential" => Ok(BackoffStrategy::Exponential),
            other => Err(format!(
                "invalid retry_backoff '{}', expected one of: fixed, linear, exponential",
                other
            )),
        }
    }
}

impl TryFrom<String> for BackoffStrategy {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

impl From<BackoffStrategy> for String {
    fn from(strategy: BackoffStrategy) -> Self {
        strategy.as_str().to_string()
    }
}

impl fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable backoff parameters
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub strategy: BackoffStrategy,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Randomise each delay within [0.8, 1.2] of its nominal value
    pub jitter: bool,
    /// Retries after the initial attempt; 0 disables retrying
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay: Duration::from_secs(5),
            jitter: true,
            max_attempts: 3,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `retry` (1-based), without jitter
    pub fn nominal_delay(&self, retry: u32) -> Duration {
        let retry = retry.max(1);
        let base = self.base_delay.as_secs_f64();
        let secs = match self.strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base * f64::from(retry),
            BackoffStrategy::Exponential => base * 2f64.powi((retry - 1).min(64) as i32),
        };
        Duration::from_secs_f64(secs.min(MAX_DELAY.as_secs_f64()))
    }

    /// Delay before retry number `retry`, jittered when enabled
    pub fn delay(&self, retry: u32) -> Duration {
        let nominal = self.nominal_delay(retry);
        if !self.jitter {
            return nominal;
        }
        let factor = rand::thread_rng().gen_range(JITTER_RANGE);
        nominal.mul_f64(factor).max(MIN_JITTERED_DELAY)
    }
}

/// Backoff plus the retry decision per error class
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryPolicy {
    pub backoff: BackoffPolicy,
    /// Retry DATABASE_ERROR like a connection failure
    pub retry_on_database_error: bool,
}

impl RetryPolicy {
    /// Whether a failure with `code` may be retried at all
    pub fn is_retryable(&self, code: ErrorCode) -> bool {
        code.is_retryable() || (self.retry_on_database_error && code == ErrorCode::DatabaseError)
    }
}

/// Why the coordinator stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeReason {
    /// An attempt succeeded
    Succeeded,
    /// The failure class is never retried
    NonRetryable,
    /// Retry budget used up
    Exhausted,
    /// Shutdown arrived while waiting for the next retry
    Interrupted,
}

/// Verdict for one tick
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    /// Result of the last attempt made
    pub result: HealthCheckResult,
    /// Attempts made, including the first
    pub attempts: u32,
    pub reason: OutcomeReason,
}

impl RetryOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }

    pub fn was_interrupted(&self) -> bool {
        self.reason == OutcomeReason::Interrupted
    }
}

/// Runs a probe under a [`RetryPolicy`]
pub struct RetryCoordinator {
    policy: RetryPolicy,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl RetryCoordinator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            metrics: None,
        }
    }

    /// Forward every attempt result to `sink`
    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    /// Run `probe` until it succeeds, fails terminally, or `shutdown` fires
    /// during a backoff wait. An attempt already in flight is never cut short.
    pub async fn run_with_retry<P>(&self, probe: &P, shutdown: &CancellationToken) -> RetryOutcome
    where
        P: Probe + ?Sized,
    {
        let max_retries = self.policy.backoff.max_attempts;
        let mut retries: u32 = 0;

        loop {
            let result = probe.execute().await;
            let attempt = retries + 1;

            if let Some(metrics) = &self.metrics {
                metrics.record(&result);
            }

            let Some(code) = result.error_code() else {
                if retries > 0 {
                    info!(
                        status = "success",
                        response_time_ms = result.response_time_ms(),
                        attempt,
                        "Health check succeeded after {} retries",
                        retries
                    );
                } else {
                    info!(
                        status = "success",
                        response_time_ms = result.response_time_ms(),
                        attempt,
                        "{}",
                        result
                    );
                }
                return RetryOutcome {
                    result,
                    attempts: attempt,
                    reason: OutcomeReason::Succeeded,
                };
            };

            let error_message = result.error_message().unwrap_or_default();

            if !self.policy.is_retryable(code) {
                error!(
                    status = "failure",
                    error_code = code.as_str(),
                    error_message,
                    response_time_ms = result.response_time_ms(),
                    attempt,
                    "{} (not retryable)",
                    result
                );
                return RetryOutcome {
                    result,
                    attempts: attempt,
                    reason: OutcomeReason::NonRetryable,
                };
            }

            if retries >= max_retries {
                error!(
                    status = "failure",
                    error_code = code.as_str(),
                    error_message,
                    response_time_ms = result.response_time_ms(),
                    attempt,
                    max_retries,
                    "{} (gave up after {} retries)",
                    result,
                    retries
                );
                return RetryOutcome {
                    result,
                    attempts: attempt,
                    reason: OutcomeReason::Exhausted,
                };
            }

            retries += 1;
            let delay = self.policy.backoff.delay(retries);

            warn!(
                status = "failure",
                error_code = code.as_str(),
                error_message,
                response_time_ms = result.response_time_ms(),
                attempt,
                max_retries,
                retry_delay_secs = delay.as_secs_f64(),
                "{}, retrying in {:.1}s (retry {}/{})",
                result,
                delay.as_secs_f64(),
                retries,
                max_retries
            );

            if !sleep_or_cancel(delay, shutdown).await {
                info!(attempt, "Retry wait interrupted by shutdown");
                return RetryOutcome {
                    result,
                    attempts: attempt,
                    reason: OutcomeReason::Interrupted,
                };
            }
        }
    }
}

/// Sleep for `duration` unless `shutdown` fires first.
///
/// Returns `true` if the full duration elapsed.
pub async fn sleep_or_cancel(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
