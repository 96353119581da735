//! Scheduling and reconciliation primitives.
//!
//! This library holds the I/O-free core of the scheduler:
//!
//! - **Allocation**: rank pending jobs and greedily admit them against a
//!   capacity snapshot ([`allocate`]).
//! - **Reconciliation**: diff the admitted set against the worker processes
//!   the cluster reports and derive what to start and what to kill
//!   ([`reconcile`]).
//!
//! # Invariants
//!
//! - Both steps are pure functions of their inputs
//! - Decisions are deterministic given the same inputs
//! - Completed jobs and terminal workers are never acted upon

pub mod allocate;
pub mod hash;
pub mod model;
pub mod reconcile;

use std::time::Duration;

use thiserror::Error;

pub use allocate::{allocate, Allocation};
pub use hash::PayloadHash;
pub use model::{
    worker_name, Capacity, Job, JobCategory, JobId, JobPayload, MemoryUnit, NewJob,
    ResourceProfile, WorkerPhase, WorkerProcess,
};
pub use reconcile::{reconcile, ReconcilePlan};

/// Errors parsing model values from their string forms.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid job id: {0}")]
    InvalidJobId(String),

    #[error("invalid memory unit: {0}")]
    InvalidMemoryUnit(String),

    #[error("invalid job category: {0}")]
    InvalidCategory(String),
}

/// Default interval between scheduling cycles.
pub const DEFAULT_CYCLE_INTERVAL: Duration = Duration::from_secs(5);

/// Default bound on concurrent start or terminate calls in one batch.
pub const DEFAULT_FAN_OUT: usize = 20;
