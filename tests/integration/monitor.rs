//! Monitor loop and metrics against a live PostgreSQL server

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use db_up::health::{
    BackoffPolicy, BackoffStrategy, Monitor, MonitorExit, RetryCoordinator, RetryPolicy,
};
use db_up::metrics::HealthMetrics;
use db_up::redact::Redactor;

use crate::{checker, database_config, skip_if_not_enabled};

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        backoff: BackoffPolicy {
            strategy: BackoffStrategy::Fixed,
            base_delay: Duration::from_millis(200),
            jitter: false,
            max_attempts,
        },
        retry_on_database_error: false,
    }
}

#[tokio::test]
async fn test_run_once_against_live_database() {
    skip_if_not_enabled!();

    let config = database_config();
    let metrics = Arc::new(
        HealthMetrics::new(&config.name, &config.host, &Redactor::default()).unwrap(),
    );
    let coordinator = RetryCoordinator::new(policy(2)).with_metrics(metrics.clone());
    let monitor = Monitor::new(
        Arc::new(checker(&config, None)),
        coordinator,
        Duration::from_secs(5),
    );

    let exit = monitor.run_once(&CancellationToken::new()).await;

    assert_eq!(exit, MonitorExit::Success);
    let text = metrics.gather().unwrap();
    assert!(text.contains("db_up_checks_total"));
    assert!(text.contains(r#"status="success""#));
}

#[tokio::test]
async fn test_run_once_unreachable_exhausts_retries() {
    skip_if_not_enabled!();

    let mut config = database_config();
    config.port = 1;
    let metrics = Arc::new(
        HealthMetrics::new(&config.name, &config.host, &Redactor::default()).unwrap(),
    );
    let coordinator = RetryCoordinator::new(policy(2)).with_metrics(metrics.clone());
    let monitor = Monitor::new(
        Arc::new(checker(&config, None)),
        coordinator,
        Duration::from_secs(5),
    );

    let exit = monitor.run_once(&CancellationToken::new()).await;

    assert_eq!(exit, MonitorExit::Failure);
    assert_eq!(exit.code(), 1);
    // one initial attempt plus two retries
    assert!(metrics
        .gather()
        .unwrap()
        .lines()
        .any(|l| l.starts_with("db_up_errors_total") && l.ends_with(" 3")));
}
