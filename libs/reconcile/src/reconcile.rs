//! Diff admitted jobs against live worker processes.

use std::collections::BTreeSet;

use tracing::warn;

use crate::model::{Job, JobId, WorkerProcess};

/// Actions needed to align the cluster with the admitted set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Admitted jobs with no live worker, in admission order.
    pub start: Vec<Job>,

    /// Live workers whose job is not admitted, sorted by job id then name.
    pub kill: Vec<WorkerProcess>,

    /// Admitted jobs already represented by a live worker.
    pub satisfied: BTreeSet<JobId>,

    /// Workers in an unrecognised phase. Left untouched.
    pub anomalous: Vec<WorkerProcess>,
}

impl ReconcilePlan {
    pub fn start_job_ids(&self) -> Vec<JobId> {
        self.start.iter().map(|j| j.id).collect()
    }

    pub fn kill_job_ids(&self) -> Vec<JobId> {
        self.kill.iter().filter_map(|w| w.job_id).collect()
    }

    /// Returns true if there is nothing to start or kill.
    pub fn is_converged(&self) -> bool {
        self.start.is_empty() && self.kill.is_empty()
    }
}

/// Compute the start and kill sets.
///
/// - Terminal workers (Succeeded/Failed) are never killed and never count as
///   running their job, so their records survive.
/// - Live workers (Pending/Running) either satisfy an admitted job or are
///   killed.
/// - Workers in any other phase are reported as anomalous and left alone.
/// - Workers without a job label are not ours and are skipped.
pub fn reconcile(admitted: &[Job], live: &[WorkerProcess]) -> ReconcilePlan {
    let admitted_ids: BTreeSet<JobId> = admitted.iter().map(|j| j.id).collect();

    let mut satisfied = BTreeSet::new();
    let mut kill = Vec::new();
    let mut anomalous = Vec::new();

    for worker in live {
        let Some(job_id) = worker.job_id else {
            continue;
        };

        if worker.phase.is_terminal() {
            continue;
        }

        if !worker.phase.is_live() {
            warn!(
                worker = %worker.name,
                job_id = %job_id,
                phase = %worker.phase,
                "Encountered a worker that is neither live nor terminal"
            );
            anomalous.push(worker.clone());
            continue;
        }

        if admitted_ids.contains(&job_id) {
            satisfied.insert(job_id);
        } else {
            kill.push(worker.clone());
        }
    }

    kill.sort_by(|a, b| a.job_id.cmp(&b.job_id).then_with(|| a.name.cmp(&b.name)));

    let start = admitted
        .iter()
        .filter(|j| !satisfied.contains(&j.id))
        .cloned()
        .collect();

    ReconcilePlan {
        start,
        kill,
        satisfied,
        anomalous,
    }
}
