//! Health check engine
//!
//! This module provides:
//! - The single-attempt probe against PostgreSQL (read-only, time-bounded)
//! - Error classification and retry with fixed/linear/exponential backoff
//! - The interval-driven monitor loop with observers

mod checker;
mod monitor;
mod observer;
mod postgres;
mod result;
mod retry;
mod state;

pub use checker::{Connector, DatabaseChecker, ProbeError, Session, UNKNOWN_ERROR_MESSAGE};
pub use monitor::{Monitor, MonitorExit, MonitorState};
pub use observer::CheckObserver;
pub use postgres::{PgConnector, PgSession};
pub use result::{CheckStatus, ErrorCode, HealthCheckResult};
pub use retry::{
    sleep_or_cancel, BackoffPolicy, BackoffStrategy, OutcomeReason, Probe, RetryCoordinator,
    RetryOutcome, RetryPolicy,
};
pub use state::{TargetHealth, Transition};
