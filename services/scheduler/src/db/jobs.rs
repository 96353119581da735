//! Postgres-backed job store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobvisor_reconcile::{Job, JobId, JobPayload, MemoryUnit, NewJob, ResourceProfile};
use sqlx::PgPool;
use tracing::{debug, instrument};

use super::{DbError, JobStore};

const JOB_COLUMNS: &str = "id, priority, request_cpu, limit_cpu, request_memory, limit_memory, \
                           memory_unit, payload, created_at, admitted_at, completed_at";

/// Job store backed by the `jobs` table.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Mark a job as completed. Normally done by the worker itself.
    pub async fn complete(&self, id: JobId) -> Result<(), DbError> {
        let result = sqlx::query(
            "UPDATE jobs SET completed_at = COALESCE(completed_at, now()) WHERE id = $1",
        )
        .bind(id.get())
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(id.get()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self))]
    async fn select_pending(&self) -> Result<Vec<Job>, DbError> {
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE completed_at IS NULL ORDER BY priority DESC, id"
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::Query)?;

        debug!(count = rows.len(), "Loaded pending jobs");
        rows.into_iter().map(Job::try_from).collect()
    }

    #[instrument(skip(self, jobs), fields(count = jobs.len()))]
    async fn save_admissions(&self, jobs: &[Job]) -> Result<(), DbError> {
        if jobs.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::Transaction(e.to_string()))?;
        let now = Utc::now();

        // Dropping `tx` on an early return rolls the whole batch back.
        for job in jobs {
            let result = sqlx::query(
                r#"
                UPDATE jobs
                SET priority = $2,
                    admitted_at = COALESCE(admitted_at, $3)
                WHERE id = $1 AND completed_at IS NULL
                "#,
            )
            .bind(job.id.get())
            .bind(job.priority)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::Transaction(e.to_string()))?;

            if result.rows_affected() == 0 {
                debug!(job_id = %job.id, "Admitted job completed or vanished before persisting");
            }
        }

        tx.commit()
            .await
            .map_err(|e| DbError::Transaction(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self, job), fields(category = %job.category(), priority = job.priority))]
    async fn save(&self, job: NewJob) -> Result<Job, DbError> {
        let payload = serde_json::to_value(&job.payload)?;
        let query = format!(
            r#"
            INSERT INTO jobs (
                category, dedup_key, priority, request_cpu, limit_cpu,
                request_memory, limit_memory, memory_unit, payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (category, dedup_key) DO UPDATE
            SET priority = CASE
                WHEN jobs.completed_at IS NULL THEN EXCLUDED.priority
                ELSE jobs.priority
            END
            RETURNING {JOB_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(job.category().as_str())
            .bind(job.payload.dedup_key().as_str())
            .bind(job.priority)
            .bind(job.resources.request_cpu)
            .bind(job.resources.limit_cpu)
            .bind(job.resources.request_memory.map(to_db_int).transpose()?)
            .bind(to_db_int(job.resources.limit_memory)?)
            .bind(job.resources.memory_unit.as_str())
            .bind(payload)
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::Query)?;

        Job::try_from(row)
    }
}

fn to_db_int(value: u64) -> Result<i64, DbError> {
    i64::try_from(value).map_err(|_| DbError::InvalidRow {
        job_id: 0,
        reason: format!("memory value {value} out of range"),
    })
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(Debug)]
struct JobRow {
    id: i64,
    priority: i32,
    request_cpu: Option<f64>,
    limit_cpu: f64,
    request_memory: Option<i64>,
    limit_memory: i64,
    memory_unit: String,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
    admitted_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for JobRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            priority: row.try_get("priority")?,
            request_cpu: row.try_get("request_cpu")?,
            limit_cpu: row.try_get("limit_cpu")?,
            request_memory: row.try_get("request_memory")?,
            limit_memory: row.try_get("limit_memory")?,
            memory_unit: row.try_get("memory_unit")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            admitted_at: row.try_get("admitted_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = DbError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let job_id = row.id;
        let invalid = |reason: String| DbError::InvalidRow { job_id, reason };

        let memory_unit: MemoryUnit = row
            .memory_unit
            .parse()
            .map_err(|e: jobvisor_reconcile::ModelError| invalid(e.to_string()))?;
        let limit_memory = u64::try_from(row.limit_memory)
            .map_err(|_| invalid(format!("negative limit_memory {}", row.limit_memory)))?;
        let request_memory = row
            .request_memory
            .map(u64::try_from)
            .transpose()
            .map_err(|_| invalid("negative request_memory".to_string()))?;
        let payload: JobPayload = serde_json::from_value(row.payload.clone())
            .map_err(|e| invalid(format!("payload: {e}")))?;

        Ok(Job {
            id: JobId::new(row.id),
            priority: row.priority,
            resources: ResourceProfile {
                request_cpu: row.request_cpu,
                limit_cpu: row.limit_cpu,
                request_memory,
                limit_memory,
                memory_unit,
            },
            payload,
            created_at: row.created_at,
            admitted_at: row.admitted_at,
            completed_at: row.completed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(memory_unit: &str, limit_memory: i64, payload: serde_json::Value) -> JobRow {
        JobRow {
            id: 11,
            priority: 90,
            request_cpu: Some(1.0),
            limit_cpu: 1.0,
            request_memory: Some(2048),
            limit_memory,
            memory_unit: memory_unit.to_string(),
            payload,
            created_at: Utc::now(),
            admitted_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_row_to_job() {
        let job = Job::try_from(row(
            "mib",
            8192,
            serde_json::json!({"category": "rop_cache", "challenge_set_id": 3}),
        ))
        .unwrap();

        assert_eq!(job.id, JobId::new(11));
        assert_eq!(job.payload, JobPayload::RopCache { challenge_set_id: 3 });
        assert_eq!(job.resources.limit_memory_bytes(), 8 * 1024 * 1024 * 1024);
        assert_eq!(job.resources.request_memory, Some(2048));
    }

    #[test]
    fn test_row_rejects_bad_unit() {
        let err = Job::try_from(row(
            "parsecs",
            1,
            serde_json::json!({"category": "cache", "binary_id": 1}),
        ))
        .unwrap_err();
        assert!(matches!(err, DbError::InvalidRow { job_id: 11, .. }));
    }

    #[test]
    fn test_row_rejects_negative_memory() {
        let err = Job::try_from(row(
            "gib",
            -1,
            serde_json::json!({"category": "cache", "binary_id": 1}),
        ))
        .unwrap_err();
        assert!(matches!(err, DbError::InvalidRow { .. }));
    }
}
