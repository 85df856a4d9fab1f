//! Redacting tracing layer
//!
//! Every event is collected into a [`LogRecord`], each string field (and the
//! message) is passed through the [`Redactor`], and only then is the record
//! formatted and handed to the sinks.

use std::fmt;
use std::io::{self, Write};

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Number, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::config::LogFormat;
use crate::redact::{is_sensitive_key, Redactor, MASK};

use super::rotate::RotatingFile;

/// Value of the `application` key in JSON records
pub const APPLICATION: &str = "db-up";

/// Destination for formatted log lines
pub trait LogSink: Send + Sync {
    /// Write one line; `line` has no trailing newline
    fn write_line(&self, line: &str) -> io::Result<()>;
}

/// Writes to stderr
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        let mut err = io::stderr().lock();
        err.write_all(line.as_bytes())?;
        err.write_all(b"\n")
    }
}

/// Writes to a rotating file
#[derive(Debug)]
pub struct FileSink {
    file: Mutex<RotatingFile>,
}

impl FileSink {
    pub fn new(file: RotatingFile) -> Self {
        Self {
            file: Mutex::new(file),
        }
    }
}

impl LogSink for FileSink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        let mut record = Vec::with_capacity(line.len() + 1);
        record.extend_from_slice(line.as_bytes());
        record.push(b'\n');
        self.file.lock().write_record(&record)
    }
}

/// Typed event field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    I64(i64),
    U64(u64),
    F64(f64),
    Bool(bool),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(s) if s.is_empty() || s.contains(char::is_whitespace) => {
                write!(f, "{:?}", s)
            }
            FieldValue::Str(s) => f.write_str(s),
            FieldValue::I64(v) => write!(f, "{}", v),
            FieldValue::U64(v) => write!(f, "{}", v),
            FieldValue::F64(v) => write!(f, "{}", v),
            FieldValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl FieldValue {
    fn to_json(&self) -> Value {
        match self {
            FieldValue::Str(s) => Value::String(s.clone()),
            FieldValue::I64(v) => Value::from(*v),
            FieldValue::U64(v) => Value::from(*v),
            FieldValue::F64(v) => Number::from_f64(*v).map_or(Value::Null, Value::Number),
            FieldValue::Bool(v) => Value::Bool(*v),
        }
    }
}

/// One event, already redacted
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub message: String,
    pub fields: Vec<(&'static str, FieldValue)>,
}

impl LogRecord {
    /// Build a record from an event, redacting as fields are collected
    pub fn from_event(event: &Event<'_>, redactor: &Redactor) -> Self {
        let mut visitor = FieldVisitor {
            redactor,
            message: String::new(),
            fields: Vec::new(),
        };
        event.record(&mut visitor);

        Self {
            timestamp: Utc::now(),
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        }
    }

    /// `2024-01-15 10:30:00 [INFO] message key=value ...`
    pub fn to_text(&self) -> String {
        let mut line = format!(
            "{} [{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            level_name(&self.level),
            self.message
        );
        for (name, value) in &self.fields {
            line.push_str(&format!(" {}={}", name, value));
        }
        line
    }

    /// One JSON object; event fields never replace the fixed keys
    pub fn to_json(&self) -> String {
        let mut object = Map::new();
        object.insert(
            "timestamp".into(),
            Value::String(self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        object.insert(
            "level".into(),
            Value::String(level_name(&self.level).into()),
        );
        object.insert("message".into(), Value::String(self.message.clone()));
        object.insert("application".into(), Value::String(APPLICATION.into()));

        for (name, value) in &self.fields {
            object
                .entry(name.to_string())
                .or_insert_with(|| value.to_json());
        }

        Value::Object(object).to_string()
    }

    pub fn format(&self, format: LogFormat) -> String {
        match format {
            LogFormat::Text => self.to_text(),
            LogFormat::Json => self.to_json(),
        }
    }
}

/// Level names used in output; TRACE folds into DEBUG
pub fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::TRACE | Level::DEBUG => "DEBUG",
        Level::INFO => "INFO",
        Level::WARN => "WARNING",
        Level::ERROR => "ERROR",
    }
}

struct FieldVisitor<'a> {
    redactor: &'a Redactor,
    message: String,
    fields: Vec<(&'static str, FieldValue)>,
}

impl FieldVisitor<'_> {
    fn push_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = self.redactor.redact(value);
            return;
        }
        let value = if is_sensitive_key(field.name()) {
            MASK.to_string()
        } else {
            self.redactor.redact(value)
        };
        self.fields.push((field.name(), FieldValue::Str(value)));
    }

    fn push(&mut self, field: &Field, value: FieldValue) {
        if is_sensitive_key(field.name()) {
            self.fields.push((field.name(), FieldValue::Str(MASK.to_string())));
        } else {
            self.fields.push((field.name(), value));
        }
    }
}

impl Visit for FieldVisitor<'_> {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.push(field, FieldValue::F64(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, FieldValue::I64(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, FieldValue::U64(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, FieldValue::Bool(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.push_str(field, value);
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.push_str(field, &value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push_str(field, &format!("{:?}", value));
    }
}

/// Layer that redacts, formats and fans out every event it sees
pub struct RedactingLayer {
    format: LogFormat,
    redactor: Redactor,
    sinks: Vec<Box<dyn LogSink>>,
}

impl RedactingLayer {
    pub fn new(format: LogFormat, redactor: Redactor) -> Self {
        Self {
            format,
            redactor,
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: impl LogSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    #[cfg(test)]
    pub(crate) fn sink_count(&self) -> usize {
        self.sinks.len()
    }
}

impl<S: Subscriber> Layer<S> for RedactingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let line = LogRecord::from_event(event, &self.redactor).format(self.format);
        for sink in &self.sinks {
            // a broken sink must never reach the caller
            let _ = sink.write_line(&line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tracing::{debug, error, info, warn};
    use tracing_subscriber::layer::SubscriberExt;

    use crate::config::LogLevel;
    use crate::logging::level_filter;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<String>>>);

    impl Captured {
        fn lines(&self) -> Vec<String> {
            self.0.lock().clone()
        }
    }

    impl LogSink for Captured {
        fn write_line(&self, line: &str) -> io::Result<()> {
            self.0.lock().push(line.to_string());
            Ok(())
        }
    }

    struct Broken;

    impl LogSink for Broken {
        fn write_line(&self, _line: &str) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }
    }

    fn capture(format: LogFormat, level: LogLevel, f: impl FnOnce()) -> Vec<String> {
        let sink = Captured::default();
        let layer = RedactingLayer::new(format, Redactor::default()).with_sink(sink.clone());
        let subscriber =
            tracing_subscriber::registry().with(layer.with_filter(level_filter(level)));
        tracing::subscriber::with_default(subscriber, f);
        sink.lines()
    }

    #[test]
    fn test_text_format() {
        let lines = capture(LogFormat::Text, LogLevel::Info, || {
            info!(
                status = "success",
                response_time_ms = 12.5,
                "Health check passed"
            );
        });

        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert!(line.contains(" [INFO] Health check passed"));
        assert!(line.ends_with("status=success response_time_ms=12.5"));
        // YYYY-mm-dd HH:MM:SS prefix
        assert_eq!(line.as_bytes()[4], b'-');
        assert_eq!(line.as_bytes()[13], b':');
    }

    #[test]
    fn test_json_format() {
        let lines = capture(LogFormat::Json, LogLevel::Info, || {
            warn!(
                status = "failure",
                error_code = "CONNECTION_ERROR",
                attempt = 2u32,
                response_time_ms = 41.0,
                "Health check failed"
            );
        });

        let value: Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(value["level"], "WARNING");
        assert_eq!(value["message"], "Health check failed");
        assert_eq!(value["application"], APPLICATION);
        assert_eq!(value["status"], "failure");
        assert_eq!(value["error_code"], "CONNECTION_ERROR");
        assert_eq!(value["attempt"], 2);
        assert_eq!(value["response_time_ms"], 41.0);
        assert!(DateTime::parse_from_rfc3339(value["timestamp"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_fields_and_message_redacted() {
        let lines = capture(LogFormat::Json, LogLevel::Debug, || {
            error!(
                error_message = "connect to postgresql://app:hunter2@db/prod failed",
                password = "hunter2",
                "login failed password=hunter2"
            );
        });

        let line = &lines[0];
        assert!(!line.contains("hunter2"), "leaked: {line}");
        let value: Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["password"], MASK);
    }

    #[test]
    fn test_redacted_json_stays_valid() {
        let lines = capture(LogFormat::Json, LogLevel::Info, || {
            info!(
                detail = r#"retrying with token="abc" after "quoted" error"#,
                "x"
            );
        });
        assert!(!lines[0].contains("abc"));
        assert!(serde_json::from_str::<Value>(&lines[0]).is_ok());
    }

    #[test]
    fn test_level_filter() {
        let lines = capture(LogFormat::Text, LogLevel::Warning, || {
            debug!("hidden");
            info!("hidden");
            warn!("shown");
            error!("shown too");
        });
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("[WARNING] shown"));
        assert!(lines[1].contains("[ERROR] shown too"));
    }

    #[test]
    fn test_foreign_targets_limited_to_warn() {
        let lines = capture(LogFormat::Text, LogLevel::Debug, || {
            info!(target: "sqlx::query", "noisy");
            warn!(target: "sqlx::query", "important");
            debug!("ours");
        });
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("important"));
        assert!(lines[1].contains("[DEBUG] ours"));
    }

    #[test]
    fn test_broken_sink_is_ignored() {
        let sink = Captured::default();
        let layer = RedactingLayer::new(LogFormat::Text, Redactor::default())
            .with_sink(Broken)
            .with_sink(sink.clone());
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || info!("still delivered"));
        assert_eq!(sink.lines().len(), 1);
    }

    #[test]
    fn test_level_names() {
        assert_eq!(level_name(&Level::TRACE), "DEBUG");
        assert_eq!(level_name(&Level::WARN), "WARNING");
    }

    #[test]
    fn test_text_quotes_values_with_spaces() {
        assert_eq!(FieldValue::Str("a b".into()).to_string(), "\"a b\"");
        assert_eq!(FieldValue::Str("ab".into()).to_string(), "ab");
    }
}
