use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::health::{BackoffPolicy, BackoffStrategy, RetryPolicy};

use super::query::{HealthQuery, DEFAULT_HEALTH_QUERY};
use super::ConfigError;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Target database
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Check scheduling and retry behaviour
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Log level, format and destinations
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Prometheus exporter
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Check every section, failing on the first invalid value
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.monitor.validate()?;
        self.logging.validate()?;
        self.metrics.validate()?;
        Ok(())
    }
}

// ============================================================================
// Database
// ============================================================================

/// PostgreSQL SSL negotiation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum SslMode {
    Disable,
    Allow,
    Prefer,
    #[default]
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Allow => "allow",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }

    /// Mode actually negotiated when certificate verification is disabled
    pub fn effective(self, verify: bool) -> Self {
        match self {
            SslMode::VerifyCa | SslMode::VerifyFull if !verify => SslMode::Require,
            other => other,
        }
    }
}

impl FromStr for SslMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disable" => Ok(SslMode::Disable),
            "allow" => Ok(SslMode::Allow),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(format!(
                "invalid ssl_mode '{}', expected one of: disable, allow, prefer, require, verify-ca, verify-full",
                other
            )),
        }
    }
}

impl TryFrom<String> for SslMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

impl From<SslMode> for String {
    fn from(mode: SslMode) -> Self {
        mode.as_str().to_string()
    }
}

/// Connection target
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database name
    #[serde(default)]
    pub name: String,
    /// Only ever taken from `DB_PASSWORD` or `DATABASE_URL`
    #[serde(skip_deserializing, default)]
    pub password: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub ssl_mode: SslMode,
    /// Verify server certificates; when false verify-* modes fall back to `require`
    #[serde(default = "default_true")]
    pub ssl_verify: bool,
    /// Connect timeout (seconds)
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout: u64,
    /// Server-side statement timeout (seconds)
    #[serde(default = "default_timeout_secs")]
    pub statement_timeout: u64,
    /// Reported in pg_stat_activity
    #[serde(default = "default_application_name")]
    pub application_name: String,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_application_name() -> String {
    "db-up".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            password: String::new(),
            host: default_host(),
            port: default_port(),
            user: default_user(),
            ssl_mode: SslMode::default(),
            ssl_verify: default_true(),
            connect_timeout: default_timeout_secs(),
            statement_timeout: default_timeout_secs(),
            application_name: default_application_name(),
        }
    }
}

impl DatabaseConfig {
    /// `host:port`, used for log fields and metric labels
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::invalid(
                "database.name",
                "database name is required (set DB_NAME)",
            ));
        }
        if self.password.is_empty() {
            return Err(ConfigError::invalid(
                "database.password",
                "database password is required (set DB_PASSWORD)",
            ));
        }
        if self.port == 0 {
            return Err(ConfigError::invalid(
                "database.port",
                "port must be between 1 and 65535",
            ));
        }
        if self.connect_timeout < 1 {
            return Err(ConfigError::invalid(
                "database.connect_timeout",
                "connect_timeout must be at least 1 second",
            ));
        }
        if self.statement_timeout < 1 {
            return Err(ConfigError::invalid(
                "database.statement_timeout",
                "statement_timeout must be at least 1 second",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Monitor
// ============================================================================

pub const MIN_CHECK_INTERVAL_SECS: u64 = 5;
pub const MAX_CHECK_INTERVAL_SECS: u64 = 3600;

/// Scheduling and retry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// Seconds between ticks
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    /// Retries after the first failed attempt of a tick
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_backoff: BackoffStrategy,
    /// Base retry delay (seconds)
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
    #[serde(default = "default_true")]
    pub retry_jitter: bool,
    /// Treat DATABASE_ERROR as retryable
    #[serde(default)]
    pub retry_on_database_error: bool,
    #[serde(default = "default_health_check_query")]
    pub health_check_query: String,
}

fn default_check_interval() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5
}

fn default_health_check_query() -> String {
    DEFAULT_HEALTH_QUERY.to_string()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            max_retries: default_max_retries(),
            retry_backoff: BackoffStrategy::default(),
            retry_delay: default_retry_delay(),
            retry_jitter: default_true(),
            retry_on_database_error: false,
            health_check_query: default_health_check_query(),
        }
    }
}

impl MonitorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }

    /// Whitelisted health check query
    pub fn health_query(&self) -> Result<HealthQuery, ConfigError> {
        HealthQuery::parse(&self.health_check_query)
    }

    /// Retry policy handed to the coordinator
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            backoff: BackoffPolicy {
                strategy: self.retry_backoff,
                base_delay: Duration::from_secs(self.retry_delay),
                jitter: self.retry_jitter,
                max_attempts: self.max_retries,
            },
            retry_on_database_error: self.retry_on_database_error,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_CHECK_INTERVAL_SECS..=MAX_CHECK_INTERVAL_SECS).contains(&self.check_interval) {
            return Err(ConfigError::invalid(
                "monitor.check_interval",
                format!(
                    "check_interval must be between {} and {} seconds",
                    MIN_CHECK_INTERVAL_SECS, MAX_CHECK_INTERVAL_SECS
                ),
            ));
        }
        if self.retry_delay < 1 {
            return Err(ConfigError::invalid(
                "monitor.retry_delay",
                "retry_delay must be at least 1 second",
            ));
        }
        self.health_query()?;
        Ok(())
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Minimum severity written to the sinks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            other => Err(format!(
                "invalid log level '{}', expected one of: DEBUG, INFO, WARNING, ERROR",
                other
            )),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        level.as_str().to_string()
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where log lines go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

impl LogOutput {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogOutput::Console => "console",
            LogOutput::File => "file",
            LogOutput::Both => "both",
        }
    }

    pub fn console(&self) -> bool {
        matches!(self, LogOutput::Console | LogOutput::Both)
    }

    pub fn file(&self) -> bool {
        matches!(self, LogOutput::File | LogOutput::Both)
    }
}

impl FromStr for LogOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" => Ok(LogOutput::Both),
            other => Err(format!(
                "invalid log output '{}', expected one of: console, file, both",
                other
            )),
        }
    }
}

impl TryFrom<String> for LogOutput {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

impl From<LogOutput> for String {
    fn from(output: LogOutput) -> Self {
        output.as_str().to_string()
    }
}

/// Line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!(
                "invalid log format '{}', expected one of: text, json",
                other
            )),
        }
    }
}

impl TryFrom<String> for LogFormat {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

impl From<LogFormat> for String {
    fn from(format: LogFormat) -> Self {
        format.as_str().to_string()
    }
}

pub const MIN_LOG_FILE_SIZE: u64 = 1024;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub output: LogOutput,
    #[serde(default = "default_log_file")]
    pub file_path: String,
    /// Rotate once the active file would exceed this many bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Rotated files kept next to the active one
    #[serde(default = "default_backup_count")]
    pub backup_count: usize,
    #[serde(default)]
    pub format: LogFormat,
    /// Also mask IPv4 literals and `localhost`
    #[serde(default)]
    pub redact_hostnames: bool,
}

fn default_log_file() -> String {
    "logs/db-up.log".to_string()
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

fn default_backup_count() -> usize {
    5
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            output: LogOutput::default(),
            file_path: default_log_file(),
            max_file_size: default_max_file_size(),
            backup_count: default_backup_count(),
            format: LogFormat::default(),
            redact_hostnames: false,
        }
    }
}

impl LoggingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_file_size < MIN_LOG_FILE_SIZE {
            return Err(ConfigError::invalid(
                "logging.max_file_size",
                format!("max_file_size must be at least {} bytes", MIN_LOG_FILE_SIZE),
            ));
        }
        if self.output.file() && self.file_path.trim().is_empty() {
            return Err(ConfigError::invalid(
                "logging.file_path",
                "file_path is required when logging to a file",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_host")]
    pub host: String,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_host() -> String {
    "0.0.0.0".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_metrics_host(),
            port: default_metrics_port(),
        }
    }
}

impl MetricsConfig {
    /// Listen address for the exporter
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.port == 0 {
            return Err(ConfigError::invalid(
                "metrics.port",
                "port must be between 1 and 65535",
            ));
        }
        Ok(())
    }
}
