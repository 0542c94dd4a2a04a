//! crosspost-send - Background daemon for scheduled cross-posting
//!
//! Sweeps the post store at a fixed interval and publishes scheduled posts
//! once they fall due. Use it when the sweep should run outside the API
//! process (`crosspost-server --no-scheduler`).

use anyhow::Context;
use clap::Parser;
use libcrosspost::logging::LoggingConfig;
use libcrosspost::service::http_client;
use libcrosspost::{Config, CrosspostError, CrosspostService, OAuthService, Scheduler};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "crosspost-send")]
#[command(version)]
#[command(about = "Background daemon for scheduled cross-posting")]
#[command(long_about = "\
crosspost-send - Background daemon for scheduled cross-posting

DESCRIPTION:
    crosspost-send is a long-running daemon that publishes scheduled posts
    to their platforms when they fall due.

    Each sweep first refreshes account tokens that are about to expire
    (flagging the ones that can't be refreshed), then claims and publishes
    every due post. A post is claimed before publishing, so several
    daemons can share one database without double-posting.

USAGE:
    # Run in foreground (logs to stderr)
    crosspost-send

    # Sweep every 30 seconds
    crosspost-send --interval 30s

    # One sweep, then exit (cron-style)
    crosspost-send --once

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current sweep)

CONFIGURATION:
    Configuration file: ~/.config/crosspost/config.toml
    (override with --config or CROSSPOST_CONFIG)

    [scheduler]
    interval_secs = 60  # seconds between sweeps
    workers = 4         # posts published concurrently per sweep

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Path to the config file (overrides CROSSPOST_CONFIG)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Sweep interval, e.g. "30s" or "2m" (overrides config)
    #[arg(long, value_name = "DURATION")]
    interval: Option<humantime::Duration>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Run a single sweep and exit
    #[arg(long)]
    once: bool,
}

fn load_config(path: Option<&PathBuf>) -> libcrosspost::Result<Config> {
    match path {
        Some(path) => {
            let mut config = Config::load_from_path(path)?;
            config.apply_env_overrides();
            Ok(config)
        }
        None => Config::load(),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    LoggingConfig::from_env(cli.verbose).init();

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(2);
        }
    };

    info!("crosspost-send daemon starting");
    if let Err(e) = run(&cli, config).await {
        error!(error = %format!("{:#}", e), "crosspost-send failed");
        let code = e
            .downcast_ref::<CrosspostError>()
            .map_or(1, CrosspostError::exit_code);
        std::process::exit(code);
    }
    info!("crosspost-send daemon stopped");
}

async fn run(cli: &Cli, config: Config) -> anyhow::Result<()> {
    // Nothing here creates posts, so the background queue goes unused
    let (service, _tasks) = CrosspostService::from_config(&config).await?;
    let refresher = Arc::new(OAuthService::new(
        http_client()?,
        &config,
        service.accounts().clone(),
    ));
    let scheduler = Scheduler::new(service)
        .with_refresher(refresher)
        .with_concurrency(config.scheduler.workers);

    if cli.once {
        let report = scheduler
            .sweep(chrono::Utc::now())
            .await
            .context("Sweep failed")?;
        info!(
            due = report.due,
            published = report.published,
            partial = report.partial,
            failed = report.failed,
            expired = report.expired,
            "crosspost-send: processed due posts once, exiting"
        );
        return Ok(());
    }

    let interval = cli
        .interval
        .map(Duration::from)
        .unwrap_or_else(|| Duration::from_secs(config.scheduler.interval_secs))
        .max(Duration::from_secs(1));
    info!("Sweep interval: {}", humantime::format_duration(interval));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    setup_signal_handlers(shutdown_tx)?;
    scheduler.run(interval, shutdown_rx).await;
    Ok(())
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: watch::Sender<bool>) -> anyhow::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Signal setup failed")?;

    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            info!("Received shutdown signal, stopping gracefully...");
            let _ = shutdown.send(true);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(shutdown: watch::Sender<bool>) -> anyhow::Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, stopping gracefully...");
            let _ = shutdown.send(true);
        }
    });
    Ok(())
}
