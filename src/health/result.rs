//! Outcome of a single probe attempt

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::redact::Redactor;

/// Status of a probe attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Success,
    Failure,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Success => "success",
            CheckStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Credentials rejected by the server
    AuthenticationError,
    /// Network failure, refused connection, timeout, DNS
    ConnectionError,
    /// Query failed or returned an unexpected result
    DatabaseError,
    /// Invalid parameters detected before any attempt
    ConfigurationError,
    /// Anything that could not be classified
    UnknownError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AuthenticationError => "AUTHENTICATION_ERROR",
            ErrorCode::ConnectionError => "CONNECTION_ERROR",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// Default retry classification.
    ///
    /// `DatabaseError` is not retried here; callers that want it retried
    /// opt in through `RetryPolicy::retry_on_database_error`.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::ConnectionError | ErrorCode::UnknownError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Success,
    Failure { code: ErrorCode, message: String },
}

/// Immutable result of one probe attempt
///
/// A success never carries an error; a failure always carries exactly one
/// code and a message that was redacted on construction.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheckResult {
    timestamp: DateTime<Utc>,
    response_time_ms: f64,
    outcome: Outcome,
}

impl HealthCheckResult {
    /// Successful attempt that took `elapsed`
    pub fn success(elapsed: Duration) -> Self {
        Self {
            timestamp: Utc::now(),
            response_time_ms: duration_ms(elapsed),
            outcome: Outcome::Success,
        }
    }

    /// Failed attempt; `message` is redacted before it is stored
    pub fn failure(
        elapsed: Duration,
        code: ErrorCode,
        message: impl AsRef<str>,
        redactor: &Redactor,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            response_time_ms: duration_ms(elapsed),
            outcome: Outcome::Failure {
                code,
                message: redactor.redact(message.as_ref()),
            },
        }
    }

    /// When the attempt completed
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn status(&self) -> CheckStatus {
        match self.outcome {
            Outcome::Success => CheckStatus::Success,
            Outcome::Failure { .. } => CheckStatus::Failure,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success)
    }

    /// Wall-clock attempt duration in milliseconds, including connection setup
    pub fn response_time_ms(&self) -> f64 {
        self.response_time_ms
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match &self.outcome {
            Outcome::Success => None,
            Outcome::Failure { code, .. } => Some(*code),
        }
    }

    /// Redacted failure message
    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success => None,
            Outcome::Failure { message, .. } => Some(message),
        }
    }
}

impl fmt::Display for HealthCheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Success => write!(
                f,
                "Health check passed - Response time: {:.0}ms",
                self.response_time_ms
            ),
            Outcome::Failure { code, message } => {
                write!(f, "Health check failed - {}: {}", code, message)
            }
        }
    }
}

fn duration_ms(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}
