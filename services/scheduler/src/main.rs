//! jobvisor scheduler
//!
//! Admits pending jobs against cluster capacity by priority and drives the
//! cluster's worker processes toward the admitted set.

use std::sync::Arc;

use anyhow::Result;
use jobvisor_scheduler::{
    cluster::{ClusterProvider, KubeCluster, MockCluster},
    config,
    creators::{default_creators, PgWorkSource},
    db::Database,
    scheduler::{SchedulerWorker, SchedulingCycle},
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to JOBVISOR_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting jobvisor scheduler");
    info!(
        interval_secs = config.interval.as_secs(),
        fan_out = config.fan_out,
        dry_run = config.dry_run,
        "Configuration loaded"
    );

    // Connect to database
    let db = match Database::connect(&config.database).await {
        Ok(db) => {
            info!("Database connection established");
            db
        }
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return Err(e.into());
        }
    };

    // Run migrations in dev mode
    if config.dev_mode {
        info!("Running database migrations (dev mode)");
        if let Err(e) = db.run_migrations().await {
            error!(error = %e, "Failed to run migrations");
            return Err(e.into());
        }
    }

    let cluster: Arc<dyn ClusterProvider> = if config.dry_run {
        warn!(
            cpu = config.dry_run_capacity.cpu,
            memory_bytes = config.dry_run_capacity.memory_bytes,
            slots = config.dry_run_capacity.slots,
            "Dry run: worker processes are simulated in memory"
        );
        Arc::new(MockCluster::new(config.dry_run_capacity))
    } else {
        info!(api_url = %config.kube.api_url, namespace = %config.kube.namespace, "Using Kubernetes cluster");
        Arc::new(KubeCluster::new(&config.kube)?)
    };

    let cycle = Arc::new(SchedulingCycle::new(
        Arc::new(db.job_store()),
        cluster,
        config.cycle_config(),
    ));

    let source = Arc::new(PgWorkSource::new(db.pool().clone()));
    let scheduler_worker = SchedulerWorker::new(cycle, config.worker_config())
        .with_creators(default_creators(source, config.patch_types.clone()));

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler_handle = tokio::spawn(async move {
        scheduler_worker.run(shutdown_rx).await;
    });

    // Wait for shutdown signal (Ctrl+C)
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Received shutdown signal");

    let _ = shutdown_tx.send(true);

    info!("Waiting for scheduler to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);
    if let Err(e) = tokio::time::timeout(shutdown_timeout, scheduler_handle).await {
        warn!(error = %e, "Scheduler worker did not shut down in time");
    }

    info!("Scheduler shutdown complete");
    Ok(())
}
