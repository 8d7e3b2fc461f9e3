//! Seam between the engine and the render service.
//!
//! The monitor and submitter depend on this trait rather than the
//! concrete HTTP client so tests can script queue/history responses.

use async_trait::async_trait;

use kiln_render::client::{RenderClient, RenderClientError};
use kiln_render::snapshot::{HistoryOutcome, QueueSnapshot};

/// The render service's consumed contract: submission plus the two
/// polled snapshots. No push channel exists.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Submit a workflow; returns the engine-assigned external id.
    async fn submit(&self, workflow: &serde_json::Value) -> Result<String, RenderClientError>;

    /// Fetch the running + pending queue snapshot.
    async fn get_queue(&self) -> Result<QueueSnapshot, RenderClientError>;

    /// Fetch the terminal outcome for an external id, if recorded.
    async fn get_history(
        &self,
        external_id: &str,
    ) -> Result<Option<HistoryOutcome>, RenderClientError>;
}

#[async_trait]
impl RenderEngine for RenderClient {
    async fn submit(&self, workflow: &serde_json::Value) -> Result<String, RenderClientError> {
        let response = self.submit_workflow(workflow).await?;
        Ok(response.job_id)
    }

    async fn get_queue(&self) -> Result<QueueSnapshot, RenderClientError> {
        RenderClient::get_queue(self).await
    }

    async fn get_history(
        &self,
        external_id: &str,
    ) -> Result<Option<HistoryOutcome>, RenderClientError> {
        RenderClient::get_history(self, external_id).await
    }
}
