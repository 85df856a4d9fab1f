//! Prometheus metrics for db-up
//!
//! The health engine reports every attempt through [`MetricsSink`]; the
//! optional HTTP exporter serves the collected registry for scraping.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::health::HealthCheckResult;
use crate::redact::Redactor;

/// Receives every probe attempt result
pub trait MetricsSink: Send + Sync {
    fn record(&self, result: &HealthCheckResult);
}

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("Invalid metrics address: {0}")]
    InvalidAddr(String),
    #[error("Failed to bind metrics server on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("Metrics output is not valid UTF-8")]
    Encoding,
}

/// Collector for one monitored database
pub struct HealthMetrics {
    registry: Registry,
    /// 1 when the last attempt succeeded, 0 otherwise
    connection_status: IntGauge,
    check_duration_seconds: Histogram,
    checks_total: IntCounterVec,
    errors_total: IntCounterVec,
}

impl HealthMetrics {
    /// Build a collector labelled with the (redacted) database name and host
    pub fn new(database: &str, host: &str, redactor: &Redactor) -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let database = redactor.redact(database);
        let host = redactor.redact(host);

        let labelled = |name: &str, help: &str| {
            Opts::new(name, help)
                .const_label("database", database.as_str())
                .const_label("host", host.as_str())
        };

        let connection_status = IntGauge::with_opts(labelled(
            "db_up_connection_status",
            "Database connection status (1 = up, 0 = down)",
        ))?;

        let check_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "db_up_check_duration_seconds",
                "Health check duration in seconds",
            )
            .const_label("database", database.as_str())
            .const_label("host", host.as_str())
            .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;

        let checks_total = IntCounterVec::new(
            labelled(
                "db_up_checks_total",
                "Total number of health check attempts",
            ),
            &["status"], // success, failure
        )?;

        let errors_total = IntCounterVec::new(
            labelled(
                "db_up_errors_total",
                "Total number of failed health checks by error code",
            ),
            &["error_code"],
        )?;

        registry.register(Box::new(connection_status.clone()))?;
        registry.register(Box::new(check_duration_seconds.clone()))?;
        registry.register(Box::new(checks_total.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;

        Ok(Self {
            registry,
            connection_status,
            check_duration_seconds,
            checks_total,
            errors_total,
        })
    }

    /// Metrics in Prometheus text format
    pub fn gather(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|_| MetricsError::Encoding)
    }
}

impl MetricsSink for HealthMetrics {
    fn record(&self, result: &HealthCheckResult) {
        self.connection_status
            .set(if result.is_success() { 1 } else { 0 });
        self.check_duration_seconds
            .observe(result.response_time_ms() / 1000.0);
        self.checks_total
            .with_label_values(&[result.status().as_str()])
            .inc();
        if let Some(code) = result.error_code() {
            self.errors_total.with_label_values(&[code.as_str()]).inc();
        }
    }
}

/// Running exporter
pub struct MetricsServer {
    pub addr: SocketAddr,
    pub handle: JoinHandle<()>,
}

/// Bind `addr` and serve `/metrics` and `/health` until `shutdown` fires
pub async fn start_metrics_server(
    addr: &str,
    metrics: Arc<HealthMetrics>,
    shutdown: CancellationToken,
) -> Result<MetricsServer, MetricsError> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|_| MetricsError::InvalidAddr(addr.to_string()))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| MetricsError::Bind { addr, source })?;
    let addr = listener.local_addr().unwrap_or(addr);
    info!(addr = %addr, "Metrics server listening");

    let handle = tokio::spawn(serve(listener, metrics, shutdown));
    Ok(MetricsServer { addr, handle })
}

async fn serve(listener: TcpListener, metrics: Arc<HealthMetrics>, shutdown: CancellationToken) {
    loop {
        let stream = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    warn!(error = %e, "Failed to accept metrics connection");
                    continue;
                }
            },
        };

        let metrics = metrics.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let metrics = metrics.clone();
                async move { Ok::<_, Infallible>(handle_request(&req, &metrics)) }
            });
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(error = %e, "Metrics connection error");
            }
        });
    }

    info!("Metrics server stopped");
}

fn handle_request<B>(req: &Request<B>, metrics: &HealthMetrics) -> Response<Full<Bytes>> {
    match req.uri().path() {
        "/metrics" => match metrics.gather() {
            Ok(body) => {
                let mut resp = text_response(StatusCode::OK, body);
                resp.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
                );
                resp
            }
            Err(e) => {
                warn!(error = %e, "Failed to encode metrics");
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        },
        "/health" => text_response(StatusCode::OK, "OK"),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body.into()));
    *resp.status_mut() = status;
    resp
}
