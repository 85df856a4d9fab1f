//! db-up: PostgreSQL liveness monitor
//!
//! Periodically opens a read-only, time-bounded session against one
//! database, runs a trivial query and reports the outcome through a
//! credential-safe logging pipeline and optional Prometheus metrics.

pub mod config;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod redact;
