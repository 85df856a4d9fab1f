//! Probe executor against a live PostgreSQL server

use db_up::health::{ErrorCode, Probe};

use crate::{checker, database_config, skip_if_not_enabled};

#[tokio::test]
async fn test_probe_succeeds() {
    skip_if_not_enabled!();

    let result = checker(&database_config(), None).execute().await;

    assert!(result.is_success(), "probe failed: {result}");
    assert!(result.response_time_ms() > 0.0);
}

#[tokio::test]
async fn test_wrong_password_is_authentication_error() {
    skip_if_not_enabled!();

    let mut config = database_config();
    config.password = "definitely-not-the-password".to_string();
    let result = checker(&config, None).execute().await;

    assert_eq!(result.error_code(), Some(ErrorCode::AuthenticationError));
    assert!(!result
        .error_message()
        .unwrap()
        .contains("definitely-not-the-password"));
}

#[tokio::test]
async fn test_missing_database_is_database_error() {
    skip_if_not_enabled!();

    let mut config = database_config();
    config.name = "db_up_missing_database".to_string();
    let result = checker(&config, None).execute().await;

    assert_eq!(result.error_code(), Some(ErrorCode::DatabaseError));
}

#[tokio::test]
async fn test_closed_port_is_connection_error() {
    skip_if_not_enabled!();

    let mut config = database_config();
    config.host = "127.0.0.1".to_string();
    config.port = 1;
    let result = checker(&config, None).execute().await;

    assert_eq!(result.error_code(), Some(ErrorCode::ConnectionError));
}

#[tokio::test]
async fn test_wrong_sentinel_is_database_error() {
    skip_if_not_enabled!();

    let result = checker(&database_config(), Some("SELECT 2")).execute().await;

    assert_eq!(result.error_code(), Some(ErrorCode::DatabaseError));
    assert_eq!(
        result.error_message(),
        Some("Unexpected health check result")
    );
}

#[tokio::test]
async fn test_statement_timeout_enforced() {
    skip_if_not_enabled!();

    // statement_timeout is 2s in the test config
    let result = checker(&database_config(), Some("SELECT 1 FROM pg_sleep(10)"))
        .execute()
        .await;

    assert!(!result.is_success());
    assert_eq!(result.error_code(), Some(ErrorCode::ConnectionError));
    assert!(result.response_time_ms() < 10_000.0);
}

#[tokio::test]
async fn test_bigint_sentinel_accepted() {
    skip_if_not_enabled!();

    let result = checker(
        &database_config(),
        Some("SELECT 1::bigint AS health_check;"),
    )
    .execute()
    .await;

    assert!(result.is_success(), "probe failed: {result}");
}
