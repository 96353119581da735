//! Greedy priority-first admission.
//!
//! Jobs are ranked by priority (highest first, ties by ascending job id) and
//! admitted in a single pass while their limits fit in what is left of the
//! capacity snapshot. A job that does not fit is skipped, and the scan
//! carries on with lower priorities against the unchanged remainder. This
//! is first-fit-by-priority, not an optimal packing: one large
//! high-priority job can keep out several small ones that would have fit
//! together.

use std::cmp::Ordering;

use tracing::debug;

use crate::model::{Capacity, Job, JobId};

/// Outcome of one allocation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    /// Jobs to run now, in admission order.
    pub admitted: Vec<Job>,

    /// Non-completed jobs that did not fit, in ranking order.
    pub rejected: Vec<JobId>,

    /// Capacity left after all admissions.
    pub remaining: Capacity,
}

impl Allocation {
    pub fn admitted_ids(&self) -> Vec<JobId> {
        self.admitted.iter().map(|j| j.id).collect()
    }
}

/// Ranking order: priority descending, then job id ascending.
pub fn rank(a: &Job, b: &Job) -> Ordering {
    b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id))
}

/// Decide which of `pending` should run given `capacity`.
///
/// Completed jobs are dropped before ranking. The capacity is consumed by
/// value and what is left is handed back in [`Allocation::remaining`].
pub fn allocate(pending: &[Job], mut capacity: Capacity) -> Allocation {
    let mut ranked: Vec<&Job> = pending.iter().filter(|j| !j.is_completed()).collect();
    ranked.sort_by(|a, b| rank(a, b));

    match ranked.first() {
        Some(head) => debug!(
            job_id = %head.id,
            priority = head.priority,
            fits = capacity.fits(&head.resources),
            "Checking highest priority job"
        ),
        None => debug!("No jobs to schedule"),
    }

    let mut admitted = Vec::new();
    let mut rejected = Vec::new();

    for job in ranked {
        if capacity.fits(&job.resources) {
            debug!(
                job_id = %job.id,
                category = %job.category(),
                priority = job.priority,
                "Admitting job"
            );
            capacity.reserve(&job.resources);
            admitted.push(job.clone());
        } else {
            rejected.push(job.id);
        }
    }

    Allocation {
        admitted,
        rejected,
        remaining: capacity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobPayload, MemoryUnit, NewJob, ResourceProfile};
    use chrono::Utc;
    use proptest::prelude::*;

    fn job(id: i64, priority: i32, cpu: f64, memory: u64) -> Job {
        Job::from_new(
            JobId::new(id),
            NewJob::new(
                priority,
                ResourceProfile::limits(cpu, memory, MemoryUnit::Bytes),
                JobPayload::Cache { binary_id: id },
            ),
        )
    }

    #[test]
    fn test_admits_by_priority_until_memory_exhausted() {
        let capacity = Capacity::new(4.0, 16, 10);
        let jobs = vec![job(3, 50, 1.0, 2), job(1, 100, 1.0, 8), job(2, 90, 2.0, 8)];

        let allocation = allocate(&jobs, capacity);

        assert_eq!(allocation.admitted_ids(), vec![JobId::new(1), JobId::new(2)]);
        assert_eq!(allocation.rejected, vec![JobId::new(3)]);
        assert_eq!(allocation.remaining.memory_bytes, 0);
        assert_eq!(allocation.remaining.slots, 8);
    }

    #[test]
    fn test_skips_large_job_and_keeps_scanning() {
        let capacity = Capacity::new(2.0, 100, 10);
        let jobs = vec![job(1, 100, 4.0, 1), job(2, 50, 1.0, 1), job(3, 10, 1.0, 1)];

        let allocation = allocate(&jobs, capacity);

        assert_eq!(allocation.admitted_ids(), vec![JobId::new(2), JobId::new(3)]);
        assert_eq!(allocation.rejected, vec![JobId::new(1)]);
    }

    #[test]
    fn test_slot_limit() {
        let capacity = Capacity::new(100.0, 100, 2);
        let jobs = vec![job(1, 1, 0.1, 1), job(2, 1, 0.1, 1), job(3, 1, 0.1, 1)];

        let allocation = allocate(&jobs, capacity);

        assert_eq!(allocation.admitted.len(), 2);
        assert_eq!(allocation.remaining.slots, 0);
    }

    #[test]
    fn test_completed_jobs_filtered() {
        let mut done = job(1, 100, 1.0, 1);
        done.completed_at = Some(Utc::now());
        let jobs = vec![done, job(2, 10, 1.0, 1)];

        let allocation = allocate(&jobs, Capacity::new(4.0, 16, 10));

        assert_eq!(allocation.admitted_ids(), vec![JobId::new(2)]);
        assert!(allocation.rejected.is_empty());
    }

    #[test]
    fn test_ties_broken_by_id() {
        let capacity = Capacity::new(1.0, 100, 10);
        let jobs = vec![job(9, 10, 1.0, 1), job(4, 10, 1.0, 1), job(6, 10, 1.0, 1)];

        let allocation = allocate(&jobs, capacity);

        assert_eq!(allocation.admitted_ids(), vec![JobId::new(4)]);
        assert_eq!(allocation.rejected, vec![JobId::new(6), JobId::new(9)]);
    }

    #[test]
    fn test_memory_unit_scaling_applies() {
        let capacity = Capacity::new(4.0, 16 * 1024 * 1024 * 1024, 10);
        let mut big = job(1, 10, 1.0, 16384);
        big.resources.memory_unit = MemoryUnit::MiB;
        let mut small = job(2, 5, 1.0, 1);
        small.resources.memory_unit = MemoryUnit::GiB;

        let allocation = allocate(&[big, small], capacity);

        assert_eq!(allocation.admitted_ids(), vec![JobId::new(1)]);
    }

    #[test]
    fn test_empty_input() {
        let capacity = Capacity::new(1.0, 1, 1);
        let allocation = allocate(&[], capacity);
        assert!(allocation.admitted.is_empty());
        assert_eq!(allocation.remaining, capacity);
    }

    fn arb_jobs() -> impl Strategy<Value = Vec<Job>> {
        prop::collection::vec((0i32..5, 1u32..8, 0u64..64), 0..40).prop_map(|specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (prio, cpu_quarters, mem))| {
                    job(i as i64 + 1, prio, f64::from(cpu_quarters) * 0.25, mem)
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_never_exceeds_capacity(
            jobs in arb_jobs(),
            cpu_quarters in 0u32..64,
            memory in 0u64..512,
            slots in 0u32..20,
        ) {
            let capacity = Capacity::new(f64::from(cpu_quarters) * 0.25, memory, slots);
            let allocation = allocate(&jobs, capacity);

            let cpu: f64 = allocation.admitted.iter().map(|j| j.resources.limit_cpu).sum();
            let mem: u64 = allocation.admitted.iter().map(|j| j.resources.limit_memory_bytes()).sum();

            prop_assert!(cpu <= capacity.cpu + 1e-9);
            prop_assert!(mem <= capacity.memory_bytes);
            prop_assert!(allocation.admitted.len() <= slots as usize);
            prop_assert_eq!(allocation.admitted.len() + allocation.rejected.len(), jobs.len());
        }

        #[test]
        fn prop_higher_priority_wins_exclusive_slot(
            high in 1i32..1000,
            gap in 1i32..1000,
            high_id in 1i64..100,
            low_id in 1i64..100,
        ) {
            prop_assume!(high_id != low_id);
            let low = high - gap;
            let capacity = Capacity::new(1.0, 10, 10);
            let jobs = vec![job(low_id, low, 1.0, 1), job(high_id, high, 1.0, 1)];

            let allocation = allocate(&jobs, capacity);

            prop_assert_eq!(allocation.admitted_ids(), vec![JobId::new(high_id)]);
            prop_assert_eq!(allocation.rejected.clone(), vec![JobId::new(low_id)]);
        }

        #[test]
        fn prop_admitted_in_rank_order(jobs in arb_jobs()) {
            let allocation = allocate(&jobs, Capacity::new(8.0, 256, 16));
            for pair in allocation.admitted.windows(2) {
                prop_assert_ne!(rank(&pair[0], &pair[1]), Ordering::Greater);
            }
        }
    }
}
