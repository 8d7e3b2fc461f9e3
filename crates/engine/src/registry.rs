//! Authoritative job record set.
//!
//! The registry owns every [`Job`], bridges internal ids to the render
//! service's external ids, enforces the monotonic state machine on
//! every observation, and persists creation and terminal outcomes
//! through the [`JobStore`] collaborator. All mutation goes through
//! the monitor or the submission path; readers get clones.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use kiln_core::error::CoreError;
use kiln_core::job::{Job, JobStatus};
use kiln_core::store::JobStore;
use kiln_core::types::{DbId, Timestamp};

/// Owns the authoritative job set. Wrapped in `Arc` and shared with
/// the monitor, scheduler, and API layer.
pub struct JobRegistry {
    jobs: RwLock<HashMap<DbId, Job>>,
    /// external_id -> internal id.
    external_index: RwLock<HashMap<String, DbId>>,
    store: Arc<dyn JobStore>,
    next_id: AtomicI64,
}

impl JobRegistry {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            external_index: RwLock::new(HashMap::new()),
            store,
            next_id: AtomicI64::new(1),
        }
    }

    /// Create and persist a new job in `Initializing` state.
    pub async fn create(
        &self,
        entity_id: DbId,
        job_type: &str,
        external_id: &str,
    ) -> Result<Job, CoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let job = Job::new(id, external_id, entity_id, job_type, Utc::now());

        self.store.create(&job).await?;

        self.jobs.write().await.insert(id, job.clone());
        self.external_index
            .write()
            .await
            .insert(external_id.to_string(), id);

        tracing::info!(job_id = id, external_id, job_type, entity_id, "Job registered");
        Ok(job)
    }

    /// Snapshot of one job record.
    pub async fn get(&self, job_id: DbId) -> Option<Job> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    /// Resolve a render-service external id to the internal job id.
    pub async fn resolve_external(&self, external_id: &str) -> Option<DbId> {
        self.external_index.read().await.get(external_id).copied()
    }

    /// Apply a non-terminal observation from a poll cycle.
    ///
    /// Enforces the state machine and the non-decreasing progress
    /// invariant. Returns the updated job only when the visible state
    /// actually changed, so callers broadcast no duplicate updates.
    pub async fn apply_observation(&self, obs: Observation) -> Option<Job> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&obs.job_id)?;

        if job.status.is_terminal() {
            return None;
        }

        let mut changed = false;

        if obs.status != job.status {
            if !job.status.can_transition(obs.status) {
                tracing::warn!(
                    job_id = job.id,
                    from = job.status.as_str(),
                    to = obs.status.as_str(),
                    "Ignoring backward status observation",
                );
            } else {
                job.status = obs.status;
                if obs.status == JobStatus::Processing && job.started_at.is_none() {
                    job.started_at = Some(Utc::now());
                }
                changed = true;
            }
        }

        // Progress only ever moves forward.
        let floor = job.status.progress_floor();
        let proposed = obs.progress_percent.unwrap_or(floor).max(floor);
        if proposed > job.progress_percent {
            job.progress_percent = proposed.min(100);
            changed = true;
        }

        if obs.current_step.is_some() && obs.current_step != job.current_step {
            job.current_step = obs.current_step;
            job.total_steps = obs.total_steps.or(job.total_steps);
            changed = true;
        }

        if obs.estimated_completion.is_some()
            && obs.estimated_completion != job.estimated_completion
        {
            job.estimated_completion = obs.estimated_completion;
            changed = true;
        }

        changed.then(|| job.clone())
    }

    /// Finalize a job exactly once.
    ///
    /// Returns `None` if the job is unknown or already terminal, so a
    /// second timeout or a late history entry can never re-finalize.
    /// The terminal outcome is persisted through the store.
    pub async fn finalize(
        &self,
        job_id: DbId,
        status: JobStatus,
        error: Option<String>,
    ) -> Option<Job> {
        debug_assert!(status.is_terminal());

        let finalized = {
            let mut jobs = self.jobs.write().await;
            let job = jobs.get_mut(&job_id)?;
            if job.status.is_terminal() || !job.status.can_transition(status) {
                return None;
            }
            job.status = status;
            job.completed_at = Some(Utc::now());
            job.error_message = error;
            job.estimated_completion = None;
            if status == JobStatus::Completed {
                job.progress_percent = 100;
            }
            job.clone()
        };

        if let Err(e) = self.store.update(&finalized).await {
            tracing::error!(job_id, error = %e, "Failed to persist terminal outcome");
        }

        tracing::info!(
            job_id,
            status = status.as_str(),
            "Job finalized",
        );
        Some(finalized)
    }

    /// Number of jobs not yet in a terminal state.
    pub async fn active_count(&self) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|j| !j.status.is_terminal())
            .count()
    }

    /// Total number of registered jobs.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

/// One resolved poll observation for a job, fed to
/// [`JobRegistry::apply_observation`].
#[derive(Debug, Clone)]
pub struct Observation {
    pub job_id: DbId,
    pub status: JobStatus,
    /// Proposed progress; the status floor applies when absent.
    pub progress_percent: Option<i16>,
    pub current_step: Option<i32>,
    pub total_steps: Option<i32>,
    pub estimated_completion: Option<Timestamp>,
}

impl Observation {
    /// Observation carrying only a status, progress at the status floor.
    pub fn status_only(job_id: DbId, status: JobStatus) -> Self {
        Self {
            job_id,
            status,
            progress_percent: None,
            current_step: None,
            total_steps: None,
            estimated_completion: None,
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// In-memory [`JobStore`] for tests and storage-less deployments.
#[derive(Default)]
pub struct InMemoryJobStore {
    records: RwLock<HashMap<DbId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: &Job) -> Result<(), CoreError> {
        self.records.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn update(&self, job: &Job) -> Result<(), CoreError> {
        self.records.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn read(&self, job_id: DbId) -> Result<Option<Job>, CoreError> {
        Ok(self.records.read().await.get(&job_id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> JobRegistry {
        JobRegistry::new(Arc::new(InMemoryJobStore::new()))
    }

    #[tokio::test]
    async fn create_assigns_sequential_ids_and_indexes_external() {
        let reg = registry();
        let a = reg.create(1, "portrait", "ext-a").await.unwrap();
        let b = reg.create(1, "portrait", "ext-b").await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(reg.resolve_external("ext-b").await, Some(b.id));
        assert_eq!(reg.len().await, 2);
    }

    #[tokio::test]
    async fn observation_moves_status_forward() {
        let reg = registry();
        let job = reg.create(1, "portrait", "ext-a").await.unwrap();

        let updated = reg
            .apply_observation(Observation::status_only(job.id, JobStatus::Queued))
            .await
            .unwrap();
        assert_eq!(updated.status, JobStatus::Queued);
        assert_eq!(updated.progress_percent, 5);
    }

    #[tokio::test]
    async fn backward_observation_is_ignored() {
        let reg = registry();
        let job = reg.create(1, "portrait", "ext-a").await.unwrap();
        reg.apply_observation(Observation::status_only(job.id, JobStatus::Processing))
            .await
            .unwrap();

        // A late "queued" sighting must not regress the job.
        let result = reg
            .apply_observation(Observation::status_only(job.id, JobStatus::Queued))
            .await;
        assert!(result.is_none());
        assert_eq!(reg.get(job.id).await.unwrap().status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn progress_never_decreases() {
        let reg = registry();
        let job = reg.create(1, "portrait", "ext-a").await.unwrap();

        let mut obs = Observation::status_only(job.id, JobStatus::Processing);
        obs.progress_percent = Some(80);
        reg.apply_observation(obs).await.unwrap();

        let mut lower = Observation::status_only(job.id, JobStatus::Processing);
        lower.progress_percent = Some(60);
        // Same status, lower progress: nothing visible changes.
        assert!(reg.apply_observation(lower).await.is_none());
        assert_eq!(reg.get(job.id).await.unwrap().progress_percent, 80);
    }

    #[tokio::test]
    async fn unchanged_observation_emits_nothing() {
        let reg = registry();
        let job = reg.create(1, "portrait", "ext-a").await.unwrap();
        reg.apply_observation(Observation::status_only(job.id, JobStatus::Queued))
            .await
            .unwrap();
        assert!(reg
            .apply_observation(Observation::status_only(job.id, JobStatus::Queued))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn finalize_is_exactly_once() {
        let reg = registry();
        let job = reg.create(1, "portrait", "ext-a").await.unwrap();

        let first = reg.finalize(job.id, JobStatus::TimedOut, None).await;
        assert!(first.is_some());

        let second = reg.finalize(job.id, JobStatus::TimedOut, None).await;
        assert!(second.is_none());

        // A completed outcome arriving after the timeout is also rejected.
        let late = reg.finalize(job.id, JobStatus::Completed, None).await;
        assert!(late.is_none());
    }

    #[tokio::test]
    async fn finalize_completed_pins_progress_to_100() {
        let reg = registry();
        let job = reg.create(1, "portrait", "ext-a").await.unwrap();
        let done = reg.finalize(job.id, JobStatus::Completed, None).await.unwrap();
        assert_eq!(done.progress_percent, 100);
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn finalize_persists_terminal_outcome() {
        let store = Arc::new(InMemoryJobStore::new());
        let reg = JobRegistry::new(Arc::clone(&store) as Arc<dyn JobStore>);
        let job = reg.create(1, "portrait", "ext-a").await.unwrap();
        reg.finalize(job.id, JobStatus::Failed, Some("boom".into()))
            .await
            .unwrap();

        let persisted = store.read(job.id).await.unwrap().unwrap();
        assert_eq!(persisted.status, JobStatus::Failed);
        assert_eq!(persisted.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn active_count_excludes_terminal_jobs() {
        let reg = registry();
        let a = reg.create(1, "portrait", "ext-a").await.unwrap();
        let _b = reg.create(1, "portrait", "ext-b").await.unwrap();
        reg.finalize(a.id, JobStatus::Completed, None).await.unwrap();
        assert_eq!(reg.active_count().await, 1);
        assert_eq!(reg.len().await, 2);
    }

    #[tokio::test]
    async fn observations_after_finalize_are_rejected() {
        let reg = registry();
        let job = reg.create(1, "portrait", "ext-a").await.unwrap();
        reg.finalize(job.id, JobStatus::Completed, None).await.unwrap();
        assert!(reg
            .apply_observation(Observation::status_only(job.id, JobStatus::Processing))
            .await
            .is_none());
    }
}
