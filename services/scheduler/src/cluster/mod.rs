//! Cluster state provider interface.
//!
//! The cluster reports its allocatable capacity and the worker processes
//! running on it, and accepts start and terminate commands:
//! - [`KubeCluster`] talks to the Kubernetes API
//! - [`MockCluster`] keeps everything in memory for tests and dry runs

mod kube;
mod mock;
pub mod quantity;

pub use kube::{KubeCluster, KubeConfig};
pub use mock::{ClusterCall, MockCluster};

use async_trait::async_trait;
use jobvisor_reconcile::{Capacity, Job, WorkerPhase, WorkerProcess};
use thiserror::Error;

/// Cluster API errors.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Transport-level failure talking to the cluster API.
    #[error("cluster request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The cluster API answered with an unexpected status.
    #[error("cluster API returned {status}: {body}")]
    Api { status: u16, body: String },

    /// A capacity figure could not be parsed.
    #[error("invalid resource quantity: {0}")]
    InvalidQuantity(String),

    /// Failed to read the service account token.
    #[error("failed to read API token from {path}: {source}")]
    Token {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Injected or simulated failure.
    #[error("{0}")]
    Rejected(String),
}

/// Reports and mutates worker-process state.
#[async_trait]
pub trait ClusterProvider: Send + Sync {
    /// Total allocatable CPU, memory and worker slots across the cluster.
    async fn total_capacity(&self) -> Result<Capacity, ClusterError>;

    /// Worker processes in any of `phases`.
    async fn list_workers(&self, phases: &[WorkerPhase]) -> Result<Vec<WorkerProcess>, ClusterError>;

    /// Terminate a worker. Terminating a worker that no longer exists is not an error.
    async fn terminate(&self, worker_name: &str) -> Result<(), ClusterError>;

    /// Start a worker for `job`.
    async fn start(&self, job: &Job) -> Result<(), ClusterError>;
}
