//! In-memory job store.
//!
//! Mirrors the semantics of [`super::PgJobStore`] without a database. Used by
//! tests and by dry runs of the scheduler binary.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use jobvisor_reconcile::{Job, JobCategory, JobId, NewJob, PayloadHash};

use super::{DbError, JobStore};

#[derive(Default)]
struct Inner {
    next_id: i64,
    jobs: BTreeMap<JobId, Job>,
    keys: BTreeMap<(JobCategory, PayloadHash), JobId>,
}

/// Job store held entirely in memory.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
    fail_next_admission: AtomicBool,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `save_admissions` call fail without writing anything.
    pub fn fail_next_admission(&self) {
        self.fail_next_admission.store(true, Ordering::SeqCst);
    }

    /// Set the completion marker on a job.
    pub fn complete(&self, id: JobId) -> Result<(), DbError> {
        let mut inner = self.lock();
        let job = inner.jobs.get_mut(&id).ok_or(DbError::NotFound(id.get()))?;
        job.completed_at.get_or_insert_with(Utc::now);
        Ok(())
    }

    /// Look up a job by id.
    pub fn get(&self, id: JobId) -> Option<Job> {
        self.lock().jobs.get(&id).cloned()
    }

    /// Number of stored jobs, completed or not.
    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn select_pending(&self) -> Result<Vec<Job>, DbError> {
        Ok(self
            .lock()
            .jobs
            .values()
            .filter(|j| !j.is_completed())
            .cloned()
            .collect())
    }

    async fn save_admissions(&self, jobs: &[Job]) -> Result<(), DbError> {
        if self.fail_next_admission.swap(false, Ordering::SeqCst) {
            return Err(DbError::Transaction(
                "injected admission failure".to_string(),
            ));
        }

        let mut inner = self.lock();
        let now = Utc::now();
        for job in jobs {
            if let Some(stored) = inner.jobs.get_mut(&job.id) {
                if stored.is_completed() {
                    continue;
                }
                stored.priority = job.priority;
                stored.admitted_at.get_or_insert(now);
            }
        }
        Ok(())
    }

    async fn save(&self, job: NewJob) -> Result<Job, DbError> {
        let mut inner = self.lock();
        let key = (job.category(), job.payload.dedup_key());

        if let Some(id) = inner.keys.get(&key).copied() {
            let stored = inner.jobs.get_mut(&id).ok_or(DbError::NotFound(id.get()))?;
            if !stored.is_completed() {
                stored.priority = job.priority;
            }
            return Ok(stored.clone());
        }

        inner.next_id += 1;
        let id = JobId::new(inner.next_id);
        let stored = Job::from_new(id, job);
        inner.jobs.insert(id, stored.clone());
        inner.keys.insert(key, id);
        Ok(stored)
    }
}
