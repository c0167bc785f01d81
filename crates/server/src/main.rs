mod api;
mod bootstrap;
mod health;
mod notifier;

use std::time::Duration;

use anyhow::{Context, Result};
use fleetquote_core::config::{AppConfig, LoadOptions};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use fleetquote_core::config::LogFormat::*;

    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

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
    // Logging comes up before bootstrap so its events are captured.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let state = api::ApiState::new(app.controller.clone(), app.config.server.admin_api_key.clone());
    if app.config.server.admin_api_key.is_none() {
        tracing::warn!(
            event_name = "system.server.admin_disabled",
            correlation_id = "bootstrap",
            "no admin api key configured; admin routes will refuse every request"
        );
    }
    let router = api::router(state)
        .merge(health::router(app.db_pool.clone()))
        .layer(TraceLayer::new_for_http());

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "fleetquote-server listening"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
    });

    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "fleetquote-server draining in-flight requests"
    );
    let _ = shutdown_tx.send(());

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    match tokio::time::timeout(grace, server).await {
        Ok(joined) => joined??,
        Err(_) => tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "graceful shutdown window elapsed; exiting"
        ),
    }
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
