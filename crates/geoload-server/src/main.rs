//! Geoload import worker - main entry point

use std::sync::Arc;

use anyhow::{Context, Result};
use geoload_common::logging::{init_logging, LogConfig};
use tokio::sync::watch;
use tracing::info;

use geoload_server::config::{Config, JobStoreKind};
use geoload_server::db::{self, PgConnectorRegistry};
use geoload_server::import::{ImportOrchestrator, ImportSettings};
use geoload_server::jobs::{
    HttpSpaceStatistics, ImportScheduler, InMemoryJobStore, JobRepository, JobStore,
    PgJobStore, S3ObjectInspector,
};

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::builder()
        .log_file_prefix("geoload-worker")
        .filter_directives("geoload_server=debug,sqlx=warn")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    info!("Starting geoload worker");

    let config = Config::load()?;
    info!(
        connectors = config.connectors.len(),
        legacy_layout = config.import.legacy_layout,
        view_facade = config.import.use_view_facade,
        "Configuration loaded"
    );

    let store: Arc<dyn JobStore> = match config.scheduler.job_store {
        JobStoreKind::Postgres => {
            let pool = db::create_pool(&config.database).await?;
            db::health_check(&pool)
                .await
                .context("Job database is not reachable")?;
            sqlx::migrate!("../../migrations")
                .run(&pool)
                .await
                .context("Failed to run migrations")?;
            info!("Database migrations completed");
            Arc::new(PgJobStore::new(pool))
        }
        JobStoreKind::Memory => {
            info!("Using in-memory job store");
            Arc::new(InMemoryJobStore::new())
        }
    };

    let statistics = Arc::new(HttpSpaceStatistics::new(&config.statistics)?);
    let repository = JobRepository::new(store, statistics);

    let registry = Arc::new(PgConnectorRegistry::new(&config.database, &config.connectors)?);
    info!(
        connectors = ?registry.connector_ids().collect::<Vec<_>>(),
        "Connector pools registered"
    );
    let settings = ImportSettings::from_config(&config.import)?;
    let inspector = Arc::new(S3ObjectInspector::new(&config.storage).await);
    let orchestrator = Arc::new(
        ImportOrchestrator::new(registry.clone(), settings).with_inspector(inspector),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = ImportScheduler::new(repository, orchestrator, &config.scheduler);
    let handle = scheduler.start(shutdown_rx);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    handle.await?;
    registry.close().await;

    info!("Geoload worker stopped");
    Ok(())
}
