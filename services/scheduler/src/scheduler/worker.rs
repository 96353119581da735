//! Scheduler background worker.
//!
//! Runs job creation and the scheduling cycle on a periodic interval.

use std::sync::Arc;
use std::time::Duration;

use jobvisor_reconcile::DEFAULT_CYCLE_INTERVAL;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

use super::cycle::SchedulingCycle;
use crate::creators::{materialize, JobCreator};

/// Configuration for the scheduler worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Time between ticks.
    pub interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_CYCLE_INTERVAL,
        }
    }
}

/// Scheduler worker that runs the scheduling loop.
pub struct SchedulerWorker {
    cycle: Arc<SchedulingCycle>,
    creators: Vec<Box<dyn JobCreator>>,
    config: WorkerConfig,
}

impl SchedulerWorker {
    /// Create a new scheduler worker.
    pub fn new(cycle: Arc<SchedulingCycle>, config: WorkerConfig) -> Self {
        Self {
            cycle,
            creators: Vec::new(),
            config,
        }
    }

    /// Run these creators at the start of every tick.
    pub fn with_creators(mut self, creators: Vec<Box<dyn JobCreator>>) -> Self {
        self.creators = creators;
        self
    }

    /// Run the scheduler worker until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            creators = self.creators.len(),
            "Starting scheduler worker"
        );

        let mut interval = tokio::time::interval(self.config.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Scheduler worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run creators, then one scheduling cycle.
    pub async fn tick(&self) {
        if !self.creators.is_empty() {
            let created = materialize(&self.creators, self.cycle.store().as_ref()).await;
            debug!(jobs = created, "Job creators finished");
        }

        if let Err(e) = self.cycle.run_once().await {
            error!(error = %e, "Scheduling cycle failed");
        }
    }
}
