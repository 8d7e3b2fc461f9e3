//! Durable [`JobStore`] backed by the `jobs` table.
//!
//! Writes are write-through from the in-memory registry: one insert at
//! creation, one update per mutation that matters durably (terminal
//! outcomes foremost). Reads are only needed after a restart or by
//! out-of-process consumers.

use async_trait::async_trait;
use sqlx::Row;

use kiln_core::error::CoreError;
use kiln_core::job::{Job, JobStatus};
use kiln_core::store::JobStore;
use kiln_core::types::DbId;

use crate::DbPool;

/// Column list shared by all `jobs` queries.
const COLUMNS: &str = "\
    id, external_id, entity_id, job_type, status, progress_percent, \
    current_step, total_steps, submitted_at, started_at, completed_at, \
    error_message";

pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<Job, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Job {
            id: row.try_get("id")?,
            external_id: row.try_get("external_id")?,
            entity_id: row.try_get("entity_id")?,
            job_type: row.try_get("job_type")?,
            status: JobStatus::from_str(&status),
            progress_percent: row.try_get("progress_percent")?,
            current_step: row.try_get("current_step")?,
            total_steps: row.try_get("total_steps")?,
            submitted_at: row.try_get("submitted_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            // Transient estimate; never persisted.
            estimated_completion: None,
            error_message: row.try_get("error_message")?,
        })
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: &Job) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO jobs (id, external_id, entity_id, job_type, status, \
             progress_percent, submitted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(job.id)
        .bind(&job.external_id)
        .bind(job.entity_id)
        .bind(&job.job_type)
        .bind(job.status.as_str())
        .bind(job.progress_percent)
        .bind(job.submitted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn update(&self, job: &Job) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = $2, progress_percent = $3, \
             current_step = $4, total_steps = $5, started_at = $6, \
             completed_at = $7, error_message = $8 \
             WHERE id = $1",
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(job.progress_percent)
        .bind(job.current_step)
        .bind(job.total_steps)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound {
                entity: "job",
                id: job.id,
            });
        }
        Ok(())
    }

    async fn read(&self, job_id: DbId) -> Result<Option<Job>, CoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;

        row.map(|r| Self::row_to_job(&r))
            .transpose()
            .map_err(|e| CoreError::Storage(e.to_string()))
    }
}
