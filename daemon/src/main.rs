mod config;
mod event;
mod lifecycle;
mod message;
mod parser;
mod queue;
mod tail;
mod tracker;
mod watcher;
mod webhook;

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Cli;
use crate::webhook::DiscordWebhook;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C"),
                    _ = term.recv() => info!("Received SIGTERM"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Could not register SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        // Without a signal handler the only way out is killing the process.
        error!(error = %e, "Could not register Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C");
}

#[tokio::main]
async fn main() {
    init_logging();

    // ── Configuration ─────────────────────────────────────────────────────────
    let cli = Cli::parse();
    let config = match config::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("{e:#}");
            std::process::exit(1);
        }
    };

    let webhook = match DiscordWebhook::new(&config) {
        Ok(webhook) => Arc::new(webhook),
        Err(e) => {
            error!("{e:#}");
            std::process::exit(1);
        }
    };

    info!("killfeed v{} started", env!("CARGO_PKG_VERSION"));
    info!(dir = %config.watch_directory.display(), "Monitoring directory");
    info!(
        poll_secs = config.poll_interval.as_secs(),
        file_check_secs = config.file_check_interval.as_secs(),
        delay_secs = config.delay.as_secs(),
        "Timings"
    );

    lifecycle::run(config, webhook, shutdown_signal()).await;
}
