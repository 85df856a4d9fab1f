//! PostgreSQL transport for the probe, built on sqlx

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow, PgSslMode};
use sqlx::{ConnectOptions, Connection, Row};

use crate::config::{DatabaseConfig, HealthQuery, SslMode};

use super::checker::{Connector, ProbeError, Session};

/// Opens one `PgConnection` per probe attempt
#[derive(Debug, Clone)]
pub struct PgConnector {
    options: PgConnectOptions,
}

impl PgConnector {
    pub fn new(config: &DatabaseConfig) -> Self {
        let options = PgConnectOptions::new_without_pgpass()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name)
            .application_name(&config.application_name)
            .ssl_mode(pg_ssl_mode(config.ssl_mode.effective(config.ssl_verify)))
            .disable_statement_logging();

        Self { options }
    }

    pub fn options(&self) -> &PgConnectOptions {
        &self.options
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Session = PgSession;

    async fn connect(&self) -> Result<PgSession, ProbeError> {
        let conn = PgConnection::connect_with(&self.options)
            .await
            .map_err(classify)?;
        Ok(PgSession { conn: Some(conn) })
    }
}

/// Open connection for one probe.
///
/// A probe that panics or times out never reaches [`Session::close`]; the
/// `PgConnection` is then dropped with the session, which closes its socket
/// without the terminate message.
pub struct PgSession {
    conn: Option<PgConnection>,
}

impl PgSession {
    fn conn(&mut self) -> Result<&mut PgConnection, ProbeError> {
        self.conn
            .as_mut()
            .ok_or_else(|| ProbeError::Connection("session already closed".to_string()))
    }
}

#[async_trait]
impl Session for PgSession {
    async fn set_read_only(&mut self) -> Result<(), ProbeError> {
        sqlx::query("SET SESSION CHARACTERISTICS AS TRANSACTION READ ONLY")
            .execute(self.conn()?)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn set_statement_timeout(&mut self, limit: Duration) -> Result<(), ProbeError> {
        sqlx::query("SELECT set_config('statement_timeout', $1, false)")
            .bind(format!("{}ms", limit.as_millis()))
            .execute(self.conn()?)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn query_scalar(&mut self, query: &HealthQuery) -> Result<Option<i64>, ProbeError> {
        let row = sqlx::query(query.as_str())
            .fetch_optional(self.conn()?)
            .await
            .map_err(classify)?;

        row.as_ref().map(first_integer).transpose()
    }

    async fn close(&mut self) -> Result<(), ProbeError> {
        match self.conn.take() {
            Some(conn) => conn.close().await.map_err(classify),
            None => Ok(()),
        }
    }
}

/// First column as an integer of any width
fn first_integer(row: &PgRow) -> Result<i64, ProbeError> {
    row.try_get::<i32, _>(0)
        .map(i64::from)
        .or_else(|_| row.try_get::<i64, _>(0))
        .or_else(|_| row.try_get::<i16, _>(0).map(i64::from))
        .map_err(|_| ProbeError::UnexpectedResult)
}

fn pg_ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Allow => PgSslMode::Allow,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require => PgSslMode::Require,
        SslMode::VerifyCa => PgSslMode::VerifyCa,
        SslMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

/// Map a sqlx error onto the probe taxonomy
pub(crate) fn classify(err: sqlx::Error) -> ProbeError {
    match &err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            classify_sqlstate(&code, db.message())
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => ProbeError::Connection(err.to_string()),
        sqlx::Error::RowNotFound
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_) => ProbeError::Database(err.to_string()),
        _ => ProbeError::Unknown(err.to_string()),
    }
}

/// Classify a server error by SQLSTATE, falling back to its message
pub(crate) fn classify_sqlstate(code: &str, message: &str) -> ProbeError {
    let detail = if code.is_empty() {
        message.to_string()
    } else {
        format!("{} (SQLSTATE {})", message, code)
    };

    if matches!(code, "28P01" | "28000") || message.to_ascii_lowercase().contains("authentication")
    {
        return ProbeError::Authentication(detail);
    }

    // 08xxx connection exceptions, too many connections, statement timeout,
    // server shutting down
    if code.starts_with("08") || matches!(code, "53300" | "57014" | "57P01" | "57P02" | "57P03") {
        return ProbeError::Connection(detail);
    }

    ProbeError::Database(detail)
}
