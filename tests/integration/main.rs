//! Integration test entry point
//!
//! Run with: DB_UP_RUN_INTEGRATION_TESTS=1 cargo test --test integration
//!
//! Environment variables:
//! - DB_UP_RUN_INTEGRATION_TESTS: Set to "1" to enable integration tests
//! - DB_UP_TEST_HOST: PostgreSQL host (default: 127.0.0.1)
//! - DB_UP_TEST_PORT: PostgreSQL port (default: 5432)
//! - DB_UP_TEST_USER: User (default: postgres)
//! - DB_UP_TEST_PASSWORD: Password (default: postgres)
//! - DB_UP_TEST_DB: Database (default: postgres)
//! - DB_UP_TEST_SSL_MODE: SSL mode (default: disable)

mod monitor;
mod probe;

use std::env;
use std::time::Duration;

use db_up::config::{DatabaseConfig, HealthQuery, SslMode};
use db_up::health::{DatabaseChecker, PgConnector};

/// Check if integration tests should run
pub fn should_run_integration_tests() -> bool {
    env::var("DB_UP_RUN_INTEGRATION_TESTS")
        .map(|v| v == "1")
        .unwrap_or(false)
}

/// Skip test if integration tests are not enabled
#[macro_export]
macro_rules! skip_if_not_enabled {
    () => {
        if !crate::should_run_integration_tests() {
            eprintln!("Skipping integration test (set DB_UP_RUN_INTEGRATION_TESTS=1 to run)");
            return;
        }
    };
}

/// Connection settings for the test server, from the environment
pub fn database_config() -> DatabaseConfig {
    DatabaseConfig {
        name: env::var("DB_UP_TEST_DB").unwrap_or_else(|_| "postgres".to_string()),
        password: env::var("DB_UP_TEST_PASSWORD").unwrap_or_else(|_| "postgres".to_string()),
        host: env::var("DB_UP_TEST_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
        port: env::var("DB_UP_TEST_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(5432),
        user: env::var("DB_UP_TEST_USER").unwrap_or_else(|_| "postgres".to_string()),
        ssl_mode: env::var("DB_UP_TEST_SSL_MODE")
            .ok()
            .and_then(|m| m.parse().ok())
            .unwrap_or(SslMode::Disable),
        connect_timeout: 5,
        statement_timeout: 2,
        ..DatabaseConfig::default()
    }
}

/// Probe executor for `config`, optionally with a custom query
pub fn checker(config: &DatabaseConfig, query: Option<&str>) -> DatabaseChecker<PgConnector> {
    let checker = DatabaseChecker::new(
        PgConnector::new(config),
        Duration::from_secs(config.connect_timeout),
        Duration::from_secs(config.statement_timeout),
    );
    match query {
        Some(sql) => checker.with_query(HealthQuery::parse(sql).expect("invalid test query")),
        None => checker,
    }
}
