//! Durable persistence contract for job records.
//!
//! Persistence is owned by a collaborator; the registry only needs
//! create/update/read. The Postgres implementation lives in `kiln-db`;
//! tests use an in-memory implementation.

use async_trait::async_trait;

use crate::error::CoreError;
use crate::job::Job;
use crate::types::DbId;

/// Durable job persistence collaborator.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a newly created job record.
    async fn create(&self, job: &Job) -> Result<(), CoreError>;

    /// Persist the current state of an existing job record.
    async fn update(&self, job: &Job) -> Result<(), CoreError>;

    /// Read a job record back, if it exists.
    async fn read(&self, job_id: DbId) -> Result<Option<Job>, CoreError>;
}
