//! In-memory cluster for testing and dry runs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use jobvisor_reconcile::{Capacity, Job, JobId, WorkerPhase, WorkerProcess};
use tracing::info;

use super::{ClusterError, ClusterProvider};

/// A start or terminate call the mock received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    Start(JobId),
    Terminate(String),
}

#[derive(Default)]
struct State {
    capacity: Capacity,
    workers: BTreeMap<String, WorkerProcess>,
    calls: Vec<ClusterCall>,
    failing_starts: BTreeSet<JobId>,
    failing_terminations: BTreeSet<String>,
    fail_listing: bool,
}

/// Cluster provider that keeps workers in memory.
///
/// Started workers appear as `Pending` under their conventional name. A job
/// restarted while an earlier worker record still exists gets a numbered
/// name, so terminal records are never overwritten.
#[derive(Default)]
pub struct MockCluster {
    state: Mutex<State>,
    capacity_queries: AtomicUsize,
}

impl MockCluster {
    pub fn new(capacity: Capacity) -> Self {
        let cluster = Self::default();
        cluster.lock().capacity = capacity;
        cluster
    }

    /// Replace the reported capacity.
    pub fn set_capacity(&self, capacity: Capacity) {
        self.lock().capacity = capacity;
    }

    /// Add or replace a worker.
    pub fn insert_worker(&self, worker: WorkerProcess) {
        self.lock().workers.insert(worker.name.clone(), worker);
    }

    /// Change the phase of an existing worker.
    pub fn set_phase(&self, name: &str, phase: WorkerPhase) {
        if let Some(worker) = self.lock().workers.get_mut(name) {
            worker.phase = phase;
        }
    }

    /// Make every start of `job_id` fail.
    pub fn fail_start(&self, job_id: JobId) {
        self.lock().failing_starts.insert(job_id);
    }

    /// Make every termination of `worker_name` fail.
    pub fn fail_terminate(&self, worker_name: &str) {
        self.lock().failing_terminations.insert(worker_name.to_string());
    }

    /// Make worker listing fail until cleared.
    pub fn fail_listing(&self, fail: bool) {
        self.lock().fail_listing = fail;
    }

    /// All workers currently known, in name order.
    pub fn workers(&self) -> Vec<WorkerProcess> {
        self.lock().workers.values().cloned().collect()
    }

    /// Drain the recorded start/terminate calls.
    pub fn take_calls(&self) -> Vec<ClusterCall> {
        std::mem::take(&mut self.lock().calls)
    }

    /// Number of times capacity was queried.
    pub fn capacity_queries(&self) -> usize {
        self.capacity_queries.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ClusterProvider for MockCluster {
    async fn total_capacity(&self) -> Result<Capacity, ClusterError> {
        self.capacity_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.lock().capacity)
    }

    async fn list_workers(&self, phases: &[WorkerPhase]) -> Result<Vec<WorkerProcess>, ClusterError> {
        let state = self.lock();
        if state.fail_listing {
            return Err(ClusterError::Rejected("[MOCK] listing unavailable".to_string()));
        }
        Ok(state
            .workers
            .values()
            .filter(|w| phases.contains(&w.phase))
            .cloned()
            .collect())
    }

    async fn terminate(&self, worker_name: &str) -> Result<(), ClusterError> {
        let mut state = self.lock();
        state.calls.push(ClusterCall::Terminate(worker_name.to_string()));
        if state.failing_terminations.contains(worker_name) {
            return Err(ClusterError::Rejected(format!(
                "[MOCK] terminate {worker_name} refused"
            )));
        }

        info!(worker = %worker_name, "[MOCK] Terminating worker");
        state.workers.remove(worker_name);
        Ok(())
    }

    async fn start(&self, job: &Job) -> Result<(), ClusterError> {
        let mut state = self.lock();
        state.calls.push(ClusterCall::Start(job.id));
        if state.failing_starts.contains(&job.id) {
            return Err(ClusterError::Rejected(format!("[MOCK] start of job {} refused", job.id)));
        }

        let base = job.worker_name();
        let mut name = base.clone();
        let mut attempt = 1;
        while state.workers.contains_key(&name) {
            name = format!("{base}-{attempt}");
            attempt += 1;
        }

        info!(job_id = %job.id, worker = %name, category = %job.category(), "[MOCK] Starting worker");
        let worker = WorkerProcess::new(name.clone(), Some(job.id), WorkerPhase::Pending);
        state.workers.insert(name, worker);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobvisor_reconcile::{JobPayload, MemoryUnit, NewJob, ResourceProfile};

    fn job(id: i64) -> Job {
        Job::from_new(
            JobId::new(id),
            NewJob::new(
                1,
                ResourceProfile::limits(1.0, 1, MemoryUnit::GiB),
                JobPayload::Cache { binary_id: id },
            ),
        )
    }

    #[tokio::test]
    async fn test_start_and_terminate() {
        let cluster = MockCluster::new(Capacity::new(1.0, 1, 1));
        cluster.start(&job(3)).await.unwrap();

        let live = cluster.list_workers(&[WorkerPhase::Pending]).await.unwrap();
        assert_eq!(live, vec![WorkerProcess::for_job(JobId::new(3), WorkerPhase::Pending)]);

        cluster.terminate("job-3").await.unwrap();
        cluster.terminate("job-3").await.unwrap();
        assert!(cluster.workers().is_empty());
        assert_eq!(
            cluster.take_calls(),
            vec![
                ClusterCall::Start(JobId::new(3)),
                ClusterCall::Terminate("job-3".to_string()),
                ClusterCall::Terminate("job-3".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_restart_keeps_terminal_record() {
        let cluster = MockCluster::default();
        cluster.insert_worker(WorkerProcess::for_job(JobId::new(3), WorkerPhase::Succeeded));

        cluster.start(&job(3)).await.unwrap();
        cluster.start(&job(3)).await.unwrap();

        assert_eq!(
            cluster.workers(),
            vec![
                WorkerProcess::for_job(JobId::new(3), WorkerPhase::Succeeded),
                WorkerProcess::new("job-3-1", Some(JobId::new(3)), WorkerPhase::Pending),
                WorkerProcess::new("job-3-2", Some(JobId::new(3)), WorkerPhase::Pending),
            ]
        );
    }

    #[tokio::test]
    async fn test_phase_filter_and_failures() {
        let cluster = MockCluster::default();
        cluster.insert_worker(WorkerProcess::for_job(JobId::new(1), WorkerPhase::Succeeded));
        assert!(cluster
            .list_workers(&[WorkerPhase::Pending, WorkerPhase::Running])
            .await
            .unwrap()
            .is_empty());

        cluster.fail_start(JobId::new(2));
        assert!(cluster.start(&job(2)).await.is_err());

        cluster.fail_listing(true);
        assert!(cluster.list_workers(&[WorkerPhase::Running]).await.is_err());
    }
}
