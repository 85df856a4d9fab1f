use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use db_up::config::{self, Config};
use db_up::health::{DatabaseChecker, Monitor, MonitorExit, PgConnector, RetryCoordinator};
use db_up::logging;
use db_up::metrics::{start_metrics_server, HealthMetrics};
use db_up::redact::{redact, Redactor};

/// Exit code for invalid configuration
const EXIT_CONFIG_ERROR: u8 = 2;

/// PostgreSQL liveness monitor
#[derive(Debug, Parser)]
#[command(name = "db-up", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Run a single check and exit with its status
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match config::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", redact(&e.to_string()));
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    if let Err(e) = logging::init(&config.logging) {
        eprintln!("Configuration error: {}", redact(&e.to_string()));
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }
    logging::install_panic_hook();

    match run(config, cli.config.as_deref(), cli.once).await {
        Ok(exit) => ExitCode::from(exit.code()),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(
    config: Config,
    config_path: Option<&Path>,
    once: bool,
) -> anyhow::Result<MonitorExit> {
    if let Some(warning) = config_path.and_then(config::permission_warning) {
        warn!("{}", warning);
    }

    let redactor = Redactor::new(config.logging.redact_hostnames);
    let effective = serde_json::to_value(&config).context("Failed to serialize configuration")?;
    debug!(config = %redactor.redact_value(&effective), "Effective configuration");

    let checker = DatabaseChecker::new(
        PgConnector::new(&config.database),
        config.database.connect_timeout(),
        config.database.statement_timeout(),
    )
    .with_query(config.monitor.health_query()?)
    .with_redactor(redactor);

    let shutdown = CancellationToken::new();
    let mut coordinator = RetryCoordinator::new(config.monitor.retry_policy());

    if config.metrics.enabled {
        let metrics = Arc::new(
            HealthMetrics::new(&config.database.name, &config.database.host, &redactor)
                .context("Failed to create metrics collector")?,
        );
        coordinator = coordinator.with_metrics(metrics.clone());

        if let Err(e) =
            start_metrics_server(&config.metrics.addr(), metrics, shutdown.clone()).await
        {
            error!(error = %e, "Metrics exporter disabled");
        }
    }

    let monitor = Monitor::new(
        Arc::new(checker),
        coordinator,
        config.monitor.check_interval(),
    )
    .with_target(config.database.name.as_str(), config.database.addr());

    spawn_signal_handler(shutdown.clone());

    info!(
        database = %config.database.name,
        addr = %config.database.addr(),
        mode = if once { "once" } else { "continuous" },
        "db-up starting"
    );

    let exit = if once {
        monitor.run_once(&shutdown).await
    } else {
        monitor.run(&shutdown).await
    };

    // stops the metrics exporter
    shutdown.cancel();
    info!(exit_code = exit.code(), "db-up stopped");
    Ok(exit)
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            return wait_for_ctrl_c().await;
        }
    };

    tokio::select! {
        _ = wait_for_ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install SIGINT handler");
        std::future::pending::<()>().await;
    }
}
