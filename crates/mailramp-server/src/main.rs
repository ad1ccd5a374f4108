//! MailRamp - Campaign dispatcher entry point

use anyhow::{Context, Result};
use mailramp_api::AppState;
use mailramp_common::config::{Config, LoggingConfig};
use mailramp_core::{
    DispatchContext, DispatchCycle, DispatchSettings, DispatchWorker, ResendProvider, SystemClock,
};
use mailramp_storage::{repository::Repositories, DatabasePool};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    init_logging(&config.logging);

    info!("Starting MailRamp dispatcher...");

    // Initialize database
    let db_pool = DatabasePool::new(&config.database).await?;
    info!("Database connection established");

    if config.database.run_migrations {
        db_pool.migrate().await?;
        info!("Database migrations completed");
    }

    let repos = Repositories::postgres(db_pool);
    let provider = ResendProvider::new(&config.provider)
        .context("email provider is not configured")?;

    let settings = DispatchSettings::from(&config);
    info!(
        "Dispatch settings: ceiling {}, batch size {}, concurrency {}, retries {}",
        settings.max_entries_per_cycle,
        settings.max_batch_size,
        settings.concurrency_limit,
        if settings.retry.is_some() { "on" } else { "off" }
    );

    let cycle = Arc::new(DispatchCycle::new(DispatchContext {
        repos: repos.clone(),
        provider: Arc::new(provider),
        clock: Arc::new(SystemClock),
        settings,
    }));

    // Flipped once on ctrl-c; running cycles and requests finish first
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Built-in scheduler for deployments without an external cron
    let worker_handle = if config.scheduler.enabled {
        let worker = DispatchWorker::new(cycle.clone())
            .with_poll_interval(config.scheduler.poll_interval_secs);
        let shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            worker.run(shutdown).await;
        }))
    } else {
        info!("Built-in scheduler disabled; waiting for HTTP triggers");
        None
    };

    if config.api.trigger_token.is_none() {
        tracing::warn!("api.trigger_token is not set; the dispatch trigger is unauthenticated");
    }

    // Start API server
    let api_handle = {
        let app = mailramp_api::create_router(AppState {
            cycle,
            health: repos.health.clone(),
            trigger_token: config.api.trigger_token.clone(),
        });
        let addr = format!("{}:{}", config.server.bind_address, config.api.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind API server on {addr}"))?;
        info!("Starting API server on {}", addr);

        let mut shutdown = shutdown_rx;
        tokio::spawn(async move {
            let stopped = async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(stopped)
                .await
            {
                tracing::error!("API server error: {}", e);
            }
        })
    };

    info!("MailRamp started successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);

    if let Some(handle) = worker_handle {
        if let Err(e) = handle.await {
            tracing::error!("Dispatch worker task failed: {}", e);
        }
    }
    if let Err(e) = api_handle.await {
        tracing::error!("API server task failed: {}", e);
    }

    info!("MailRamp shutdown complete");

    Ok(())
}

/// `RUST_LOG` wins over `logging.level`
fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
