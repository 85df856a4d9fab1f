//! Single-attempt database probe
//!
//! [`DatabaseChecker`] drives one connect / configure / query / close cycle
//! through the [`Connector`] and [`Session`] seams and folds every outcome,
//! including panics inside the client, into a [`HealthCheckResult`].

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use tokio::time::{timeout, Instant};
use tracing::debug;

use crate::config::HealthQuery;
use crate::redact::Redactor;

use super::result::{ErrorCode, HealthCheckResult};
use super::retry::Probe;

/// Extra time granted to the server to enforce its own statement timeout
const STATEMENT_GRACE: Duration = Duration::from_secs(1);

/// Value the health check query must return
const SENTINEL: i64 = 1;

/// Message used when a failure cannot be classified
pub const UNKNOWN_ERROR_MESSAGE: &str = "An unexpected error occurred during health check";

/// Classified failure of one probe step
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Connection timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("Health check query timed out after {0:?}")]
    QueryTimeout(Duration),
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Unexpected health check result")]
    UnexpectedResult,
    #[error("Unclassified error: {0}")]
    Unknown(String),
}

impl ProbeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ProbeError::ConnectTimeout(_)
            | ProbeError::QueryTimeout(_)
            | ProbeError::Connection(_) => ErrorCode::ConnectionError,
            ProbeError::Authentication(_) => ErrorCode::AuthenticationError,
            ProbeError::Database(_) | ProbeError::UnexpectedResult => ErrorCode::DatabaseError,
            ProbeError::Unknown(_) => ErrorCode::UnknownError,
        }
    }

    /// Text stored in the failure result (redacted later)
    fn message(&self) -> String {
        match self {
            // raw text of an unclassified error is never surfaced
            ProbeError::Unknown(_) => UNKNOWN_ERROR_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

/// Opens sessions against the monitored database
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: Session;

    async fn connect(&self) -> Result<Self::Session, ProbeError>;
}

/// One open database session, used for a single probe attempt
#[async_trait]
pub trait Session: Send {
    /// Make every later transaction in this session read-only
    async fn set_read_only(&mut self) -> Result<(), ProbeError>;

    /// Apply a server-side statement timeout
    async fn set_statement_timeout(&mut self, limit: Duration) -> Result<(), ProbeError>;

    /// Run `query` and return the first column of the first row, if any
    async fn query_scalar(&mut self, query: &HealthQuery) -> Result<Option<i64>, ProbeError>;

    /// Release the session
    async fn close(&mut self) -> Result<(), ProbeError>;
}

/// Probe executor
pub struct DatabaseChecker<C> {
    connector: C,
    query: HealthQuery,
    connect_timeout: Duration,
    statement_timeout: Duration,
    redactor: Redactor,
}

impl<C: Connector> DatabaseChecker<C> {
    pub fn new(connector: C, connect_timeout: Duration, statement_timeout: Duration) -> Self {
        Self {
            connector,
            query: HealthQuery::default(),
            connect_timeout,
            statement_timeout,
            redactor: Redactor::default(),
        }
    }

    /// Run `query` instead of the default
    pub fn with_query(mut self, query: HealthQuery) -> Self {
        self.query = query;
        self
    }

    /// Redact failure messages with `redactor`
    pub fn with_redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = redactor;
        self
    }

    pub fn query(&self) -> &HealthQuery {
        &self.query
    }

    async fn attempt(&self) -> Result<(), ProbeError> {
        let mut session = timeout(self.connect_timeout, self.connector.connect())
            .await
            .map_err(|_| ProbeError::ConnectTimeout(self.connect_timeout))??;

        let outcome = self.run_query(&mut session).await;

        match timeout(self.connect_timeout, session.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Failed to close health check session: {}", e),
            Err(_) => debug!("Timed out closing health check session"),
        }

        outcome
    }

    async fn run_query(&self, session: &mut C::Session) -> Result<(), ProbeError> {
        let deadline = self.statement_timeout + STATEMENT_GRACE;

        let value = timeout(deadline, async {
            session.set_read_only().await?;
            session.set_statement_timeout(self.statement_timeout).await?;
            session.query_scalar(&self.query).await
        })
        .await
        .map_err(|_| ProbeError::QueryTimeout(deadline))??;

        match value {
            Some(SENTINEL) => Ok(()),
            _ => Err(ProbeError::UnexpectedResult),
        }
    }
}

#[async_trait]
impl<C: Connector> Probe for DatabaseChecker<C> {
    async fn execute(&self) -> HealthCheckResult {
        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.attempt()).catch_unwind().await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(())) => HealthCheckResult::success(elapsed),
            Ok(Err(e)) => {
                let code = e.code();
                debug!(error_code = code.as_str(), "Probe attempt failed: {}", e);
                HealthCheckResult::failure(elapsed, code, e.message(), &self.redactor)
            }
            Err(_) => {
                debug!("Probe attempt panicked");
                HealthCheckResult::failure(
                    elapsed,
                    ErrorCode::UnknownError,
                    UNKNOWN_ERROR_MESSAGE,
                    &self.redactor,
                )
            }
        }
    }
}
