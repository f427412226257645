// Discovery worker: consumes discovery jobs and scrapes creator profiles.

use std::sync::Arc;

use anyhow::{Context, Result};
use discovery_core::domains::discovery::DiscoveryProcessor;
use discovery_core::kernel::jobs::{
    new_worker_id, ConsumptionStrategy, DiscoveryJobHandler, DiscoveryWorker, PollStrategy, PushStrategy,
};
use discovery_core::kernel::{connect_optional, WorkerDeps};
use discovery_core::{Config, WorkerMode};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,discovery_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.discovery.concurrency as u32 + 2)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let nats = connect_optional(config.nats_url.as_deref()).await;
    let deps = WorkerDeps::from_pool(pool.clone(), &config, nats);
    let handler: Arc<dyn DiscoveryJobHandler> = Arc::new(DiscoveryProcessor::new(&deps));

    let strategy: Arc<dyn ConsumptionStrategy> = match config.discovery.mode {
        WorkerMode::Push => Arc::new(
            PushStrategy::new(
                deps.discovery_queue.clone(),
                handler,
                new_worker_id(),
                config.discovery.concurrency,
            )
            .with_heartbeat_interval(config.discovery.heartbeat_interval()),
        ),
        WorkerMode::Poll => Arc::new(PollStrategy::new(handler, config.discovery.poll_interval)),
    };

    tracing::info!(
        mode = strategy.name(),
        concurrency = config.discovery.concurrency,
        max_attempts = config.discovery.max_attempts,
        "Discovery worker configured"
    );

    let worker = Arc::new(DiscoveryWorker::new(strategy));
    let handle = worker.clone().start();

    let signal_worker = worker.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received, finishing in-flight work");
                signal_worker.stop();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    handle.await.context("Worker task panicked")?;

    deps.shutdown().await;
    pool.close().await;
    tracing::info!("Discovery worker exited");
    Ok(())
}
