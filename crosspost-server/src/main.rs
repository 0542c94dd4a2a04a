//! crosspost-server - REST API, background publisher and scheduler
//!
//! One process serves the HTTP API, drains the background publish queue
//! and, unless disabled, runs the scheduled-post sweep.

use anyhow::Context;
use clap::Parser;
use crosspost_server::{router, AppState};
use libcrosspost::logging::LoggingConfig;
use libcrosspost::service::{http_client, tasks};
use libcrosspost::{
    Config, CrosspostError, CrosspostService, OAuthService, Scheduler, TokenCipher,
};
use secrecy::ExposeSecret;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "crosspost-server")]
#[command(version)]
#[command(about = "REST API for connecting social accounts and cross-posting")]
#[command(long_about = "\
crosspost-server - REST API for connecting social accounts and cross-posting

DESCRIPTION:
    Serves the account, post and image endpoints, publishes new posts in
    the background and sweeps scheduled posts when they fall due.

USAGE:
    # Generate a token encryption key once
    crosspost-server --generate-key

    # Run with the default config (~/.config/crosspost/config.toml)
    CROSSPOST_TOKEN_KEY=AGE-SECRET-KEY-1... crosspost-server

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (in-flight requests finish)

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Path to the config file (overrides CROSSPOST_CONFIG)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print a fresh token encryption key and exit
    #[arg(long)]
    generate_key: bool,

    /// Don't run the scheduled-post sweep in this process
    #[arg(long)]
    no_scheduler: bool,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,
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

    if cli.generate_key {
        println!("{}", TokenCipher::generate().export_key().expose_secret());
        return;
    }

    LoggingConfig::from_env(cli.verbose).init();

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(config, !cli.no_scheduler).await {
        error!(error = %format!("{:#}", e), "crosspost-server failed");
        let code = e
            .downcast_ref::<CrosspostError>()
            .map_or(1, CrosspostError::exit_code);
        std::process::exit(code);
    }
}

async fn run(config: Config, scheduler_allowed: bool) -> anyhow::Result<()> {
    let (service, receiver) = CrosspostService::from_config(&config)
        .await
        .context("Failed to initialize services")?;
    let oauth = Arc::new(OAuthService::new(
        http_client()?,
        &config,
        service.accounts().clone(),
    ));

    let workers = tokio::spawn(tasks::run_workers(
        service.clone(),
        receiver,
        config.scheduler.workers,
    ));
    service
        .recover_in_flight()
        .await
        .context("Failed to recover posts left in publishing")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    setup_signal_handlers(shutdown_tx)?;

    let scheduler = if scheduler_allowed && config.scheduler.enabled {
        let scheduler = Scheduler::new(service.clone())
            .with_refresher(oauth.clone())
            .with_concurrency(config.scheduler.workers);
        let interval = Duration::from_secs(config.scheduler.interval_secs.max(1));
        let shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            scheduler.run(interval, shutdown).await;
        }))
    } else {
        info!("Scheduler disabled in this process");
        None
    };

    let bind = config.server.bind.clone();
    let app = router(AppState::new(service, oauth, config));
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!(%bind, "crosspost-server listening");

    let mut shutdown = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            info!("Shutting down server...");
        })
        .await
        .context("Server error occurred")?;

    if let Some(handle) = scheduler {
        let _ = handle.await;
    }
    // Queued tasks still running are abandoned; they are recovered on next start
    workers.abort();
    info!("crosspost-server stopped");
    Ok(())
}

/// Flip `shutdown` on SIGINT/SIGTERM
#[cfg(unix)]
fn setup_signal_handlers(shutdown: watch::Sender<bool>) -> anyhow::Result<()> {
    use futures::stream::StreamExt;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook_tokio::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Signal setup failed")?;
    tokio::spawn(async move {
        if signals.next().await.is_some() {
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
