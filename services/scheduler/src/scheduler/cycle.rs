//! One scheduling cycle.
//!
//! Phases run strictly in order:
//! 1. Load pending jobs from the store
//! 2. Take the capacity snapshot (cached from the previous cycle if present)
//! 3. Allocate
//! 4. Persist admissions in one transaction
//! 5. List non-terminal workers
//! 6. Reconcile
//! 7. Terminate unwanted workers (bounded fan-out)
//! 8. Start missing workers (bounded fan-out)
//! 9. Invalidate and refetch the capacity snapshot
//!
//! Failures in 1-6 abort the cycle; nothing is retried here; the next tick
//! repeats the whole cycle. Failures of individual start/terminate calls are
//! logged and counted without affecting their siblings.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use jobvisor_reconcile::{
    allocate, reconcile, Capacity, Job, WorkerPhase, WorkerProcess, DEFAULT_FAN_OUT,
};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::SchedulerResult;
use crate::cluster::ClusterProvider;
use crate::db::JobStore;

/// Every non-terminal phase. `Unknown` workers are listed so the reconciler
/// can report them; it never acts on them.
const LISTED_PHASES: [WorkerPhase; 3] = [
    WorkerPhase::Pending,
    WorkerPhase::Running,
    WorkerPhase::Unknown,
];

/// Tunables for a scheduling cycle.
#[derive(Debug, Clone)]
pub struct CycleConfig {
    /// Maximum concurrent start or terminate calls per batch.
    pub fan_out: usize,

    /// Capacity held back for infrastructure (database, the scheduler itself).
    pub reserved: Capacity,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            fan_out: DEFAULT_FAN_OUT,
            reserved: Capacity::default(),
        }
    }
}

/// What a cycle decided and did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub pending: usize,
    pub admitted: usize,
    pub rejected: usize,
    pub satisfied: usize,
    pub anomalous: usize,
    pub killed: usize,
    pub kill_failed: usize,
    pub started: usize,
    pub start_failed: usize,
}

impl CycleReport {
    /// Returns true if the cycle issued no start or terminate calls.
    pub fn is_noop(&self) -> bool {
        self.killed + self.kill_failed + self.started + self.start_failed == 0
    }
}

/// Drives scheduling cycles against a job store and a cluster.
pub struct SchedulingCycle {
    store: Arc<dyn JobStore>,
    cluster: Arc<dyn ClusterProvider>,
    config: CycleConfig,
    capacity: Mutex<Option<Capacity>>,
}

impl SchedulingCycle {
    /// Create a new cycle driver.
    pub fn new(
        store: Arc<dyn JobStore>,
        cluster: Arc<dyn ClusterProvider>,
        config: CycleConfig,
    ) -> Self {
        Self {
            store,
            cluster,
            config: CycleConfig {
                fan_out: config.fan_out.max(1),
                ..config
            },
            capacity: Mutex::new(None),
        }
    }

    /// Get the job store the cycle reads from.
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Run one full cycle.
    ///
    /// The capacity snapshot is refreshed at the end whether or not the
    /// cycle succeeded, so a retry never reuses a snapshot from before the
    /// failure.
    #[instrument(skip(self), name = "scheduling_cycle")]
    pub async fn run_once(&self) -> SchedulerResult<CycleReport> {
        let result = self.run_phases().await;
        self.refresh_capacity().await;
        result
    }

    async fn run_phases(&self) -> SchedulerResult<CycleReport> {
        let pending = self.store.select_pending().await?;
        let capacity = self.capacity().await?;

        let allocation = allocate(&pending, capacity);
        debug!(
            admitted = ?allocation.admitted_ids(),
            remaining_cpu = allocation.remaining.cpu,
            remaining_memory_bytes = allocation.remaining.memory_bytes,
            remaining_slots = allocation.remaining.slots,
            "Allocation complete"
        );

        self.store.save_admissions(&allocation.admitted).await?;

        let live = self.cluster.list_workers(&LISTED_PHASES).await?;
        let plan = reconcile(&allocation.admitted, &live);

        debug!(jobs = ?allocation.rejected, "Jobs not running");
        debug!(jobs = ?plan.kill_job_ids(), "Terminating workers");
        debug!(jobs = ?plan.satisfied, "Workers running already");

        let kill_failed = self.dispatch_kills(&plan.kill).await;
        let start_failed = self.dispatch_starts(&plan.start).await;

        let report = CycleReport {
            pending: pending.len(),
            admitted: allocation.admitted.len(),
            rejected: allocation.rejected.len(),
            satisfied: plan.satisfied.len(),
            anomalous: plan.anomalous.len(),
            killed: plan.kill.len() - kill_failed,
            kill_failed,
            started: plan.start.len() - start_failed,
            start_failed,
        };

        info!(
            pending = report.pending,
            admitted = report.admitted,
            rejected = report.rejected,
            satisfied = report.satisfied,
            anomalous = report.anomalous,
            killed = report.killed,
            kill_failed = report.kill_failed,
            started = report.started,
            start_failed = report.start_failed,
            "Scheduling cycle complete"
        );

        Ok(report)
    }

    /// Current capacity snapshot minus reserved overhead.
    async fn capacity(&self) -> SchedulerResult<Capacity> {
        let mut cached = self.capacity.lock().await;
        if let Some(capacity) = *cached {
            return Ok(capacity);
        }

        let available = self.fetch_capacity().await?;
        *cached = Some(available);
        Ok(available)
    }

    async fn fetch_capacity(&self) -> SchedulerResult<Capacity> {
        let total = self.cluster.total_capacity().await?;
        Ok(total.saturating_sub(&self.config.reserved))
    }

    /// Drop the cached snapshot and try to take a fresh one for the next cycle.
    pub async fn refresh_capacity(&self) {
        let mut cached = self.capacity.lock().await;
        *cached = None;

        match self.fetch_capacity().await {
            Ok(capacity) => *cached = Some(capacity),
            Err(e) => warn!(error = %e, "Failed to refresh capacity, next cycle will refetch"),
        }
    }

    /// Terminate workers concurrently. Returns how many calls failed.
    async fn dispatch_kills(&self, workers: &[WorkerProcess]) -> usize {
        let failed = AtomicUsize::new(0);

        stream::iter(workers)
            .for_each_concurrent(self.config.fan_out, |worker| {
                let failed = &failed;
                async move {
                    debug!(worker = %worker.name, job_id = ?worker.job_id, "Killing worker");
                    if let Err(e) = self.cluster.terminate(&worker.name).await {
                        warn!(worker = %worker.name, error = %e, "Failed to terminate worker");
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
            .await;

        failed.into_inner()
    }

    /// Start workers concurrently. Returns how many calls failed.
    async fn dispatch_starts(&self, jobs: &[Job]) -> usize {
        let failed = AtomicUsize::new(0);

        stream::iter(jobs)
            .for_each_concurrent(self.config.fan_out, |job| {
                let failed = &failed;
                async move {
                    debug!(
                        job_id = %job.id,
                        category = %job.category(),
                        priority = job.priority,
                        "Scheduling job"
                    );
                    if let Err(e) = self.cluster.start(job).await {
                        warn!(job_id = %job.id, error = %e, "Failed to start worker");
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
            .await;

        failed.into_inner()
    }
}
