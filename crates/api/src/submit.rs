//! Batch submission path used by the replenishment scheduler.
//!
//! For each job in a batch: build the workflow payload, submit it to
//! the render service, register the job, and hand it to the monitor.
//! A job is only ever registered after the render service accepted it,
//! so every registry record has a real external id.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use kiln_core::types::DbId;
use kiln_engine::{JobRegistry, ProgressMonitor, RenderEngine, SubmitError, Submission};

pub struct BatchSubmitter {
    engine: Arc<dyn RenderEngine>,
    registry: Arc<JobRegistry>,
    monitor: Arc<ProgressMonitor>,
    job_type: String,
}

impl BatchSubmitter {
    pub fn new(
        engine: Arc<dyn RenderEngine>,
        registry: Arc<JobRegistry>,
        monitor: Arc<ProgressMonitor>,
        job_type: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            registry,
            monitor,
            job_type: job_type.into(),
        }
    }

    /// Workflow payload for one generation job.
    fn build_workflow(&self, entity_id: DbId, index: u32) -> serde_json::Value {
        json!({
            "job_type": self.job_type,
            "entity_id": entity_id,
            "batch_index": index,
        })
    }
}

#[async_trait]
impl Submission for BatchSubmitter {
    async fn submit_batch(&self, entity_id: DbId, count: u32) -> Result<Vec<DbId>, SubmitError> {
        let mut job_ids = Vec::with_capacity(count as usize);

        for index in 0..count {
            let workflow = self.build_workflow(entity_id, index);
            let result = async {
                let external_id = self.engine.submit(&workflow).await?;
                let job = self
                    .registry
                    .create(entity_id, &self.job_type, &external_id)
                    .await?;
                self.monitor
                    .monitor_job(job.id, &external_id, &self.job_type)
                    .await;
                Ok::<DbId, SubmitError>(job.id)
            }
            .await;

            match result {
                Ok(job_id) => job_ids.push(job_id),
                // Jobs already accepted stay monitored; report a short
                // batch rather than unwinding them.
                Err(e) if !job_ids.is_empty() => {
                    tracing::warn!(entity_id, error = %e, submitted = job_ids.len(), "Batch cut short");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            entity_id,
            count = job_ids.len(),
            job_type = %self.job_type,
            "Batch submitted to render service",
        );
        Ok(job_ids)
    }
}
