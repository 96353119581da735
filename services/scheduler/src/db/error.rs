//! Job store error types.

use thiserror::Error;

/// Job store operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// The admission transaction failed to commit and was rolled back.
    #[error("admission transaction aborted: {0}")]
    Transaction(String),

    /// Failed to run migrations.
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// Migration directory not found in the current environment.
    #[error("migration directory not found; tried {tried}. Last error: {last_error}. Run from repo root or services/scheduler.")]
    MigrationDirNotFound { tried: String, last_error: String },

    /// A stored row could not be mapped back onto a job.
    #[error("invalid job row {job_id}: {reason}")]
    InvalidRow { job_id: i64, reason: String },

    /// Job not found.
    #[error("job not found: {0}")]
    NotFound(i64),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
