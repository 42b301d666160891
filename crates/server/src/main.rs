mod audit;
mod bootstrap;
mod health;
mod routes;
mod sweeper;

use std::time::Duration;

use anyhow::{Context, Result};
use navigator_core::config::{AppConfig, LoadOptions};
use tokio::{net::TcpListener, sync::watch};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use navigator_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener =
        TcpListener::bind(&address).await.with_context(|| format!("failed to bind {address}"))?;

    let (stop, shutdown) = watch::channel(false);
    let sweeper = sweeper::spawn(
        app.orchestrator.clone(),
        app.config.orchestrator.sweep_interval(),
        shutdown,
    );

    let router = routes::router(app.orchestrator.clone())
        .merge(health::router(app.db_pool.clone(), app.orchestrator.store().clone()));

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        address = %address,
        "navigator-server listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .context("http server failed")?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "navigator-server stopping"
    );

    let _ = stop.send(true);
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, sweeper).await.is_err() {
        tracing::warn!(
            event_name = "system.server.sweeper_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "sweeper did not stop within the grace period"
        );
    }
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_failed",
            correlation_id = "shutdown",
            error = %error,
            "failed to listen for shutdown signal"
        );
    }
}
