//! Scheduler module for job admission and worker placement.
//!
//! The scheduler is responsible for:
//! - Admitting pending jobs against the cluster's capacity by priority
//! - Persisting admission decisions atomically
//! - Starting workers for admitted jobs and terminating workers for the rest
//! - Running that cycle on a fixed interval

mod cycle;
mod worker;

pub use cycle::{CycleConfig, CycleReport, SchedulingCycle};
pub use worker::{SchedulerWorker, WorkerConfig};

use crate::cluster::ClusterError;
use crate::db::DbError;

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Errors that abort a scheduling cycle.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("job store error: {0}")]
    Store(#[from] DbError),

    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),
}
