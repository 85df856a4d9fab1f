//! Logging pipeline
//!
//! Installs a single [`RedactingLayer`] on a tracing registry. Crate events
//! pass at the configured level, everything else (sqlx, hyper) at WARN.

mod layer;
mod rotate;

pub use layer::{
    level_name, ConsoleSink, FieldValue, FileSink, LogRecord, LogSink, RedactingLayer, APPLICATION,
};
pub use rotate::{backup_path, RotatingFile};

use std::any::Any;
use std::path::PathBuf;

use thiserror::Error;
use tracing::error;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{LogLevel, LoggingConfig};
use crate::redact::Redactor;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to open log file {path}: {source}")]
    OpenFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to install log subscriber: {0}")]
    Init(#[from] TryInitError),
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

/// Crate targets at `level`, all other targets at WARN
pub fn level_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::builder().parse_lossy(format!(
        "{},db_up={}",
        LevelFilter::WARN,
        LevelFilter::from(level)
    ))
}

/// Build the layer and its sinks from configuration
pub fn build_layer(config: &LoggingConfig) -> Result<RedactingLayer, LoggingError> {
    let mut layer = RedactingLayer::new(config.format, Redactor::new(config.redact_hostnames));

    if config.output.console() {
        layer = layer.with_sink(ConsoleSink);
    }

    if config.output.file() {
        let file = RotatingFile::open(&config.file_path, config.max_file_size, config.backup_count)
            .map_err(|source| LoggingError::OpenFile {
                path: PathBuf::from(&config.file_path),
                source,
            })?;
        layer = layer.with_sink(FileSink::new(file));
    }

    Ok(layer)
}

/// Install the pipeline as the global subscriber
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    let layer = build_layer(config)?.with_filter(level_filter(config.level));
    tracing_subscriber::registry().with(layer).try_init()?;
    Ok(())
}

/// Replace the default panic hook so panic payloads reach the sinks
/// redacted instead of raw on stderr. Call after [`init`].
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info.location().map(|l| l.to_string()).unwrap_or_default();
        log_panic(info.payload(), &location);
    }));
}

fn log_panic(payload: &(dyn Any + Send), location: &str) {
    let message = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("Box<dyn Any>");
    error!(location, "Panic: {}", message);
}
