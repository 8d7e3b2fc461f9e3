//! REST client for the render service HTTP endpoints.
//!
//! Wraps workflow submission, queue polling, and history retrieval
//! using [`reqwest`]. The service reports nothing proactively; callers
//! poll [`RenderClient::get_queue`] and [`RenderClient::get_history`].

use serde::Deserialize;

use crate::snapshot::{HistoryOutcome, QueueSnapshot};

/// HTTP client for a single render service instance.
pub struct RenderClient {
    client: reqwest::Client,
    base_url: String,
}

/// Response returned after successfully queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Engine-assigned identifier for the queued job.
    pub job_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub queue_position: Option<i32>,
}

/// Errors from the render service REST layer.
#[derive(Debug, thiserror::Error)]
pub enum RenderClientError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Render service error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl RenderClient {
    /// Create a new client for a render service instance.
    ///
    /// * `base_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Create a client reusing an existing [`reqwest::Client`]
    /// (connection pooling across multiple consumers).
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Base HTTP URL of the render service.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Submit a workflow for execution.
    ///
    /// Sends `POST /prompt` with the workflow JSON. Returns the
    /// engine-assigned external job id and queue position.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
    ) -> Result<SubmitResponse, RenderClientError> {
        let body = serde_json::json!({ "prompt": workflow });

        let response = self
            .client
            .post(format!("{}/prompt", self.base_url))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Fetch the current execution queue (running + pending jobs).
    ///
    /// Sends `GET /queue`. One call covers every monitored job; the
    /// monitor batches all lookups against a single snapshot.
    pub async fn get_queue(&self) -> Result<QueueSnapshot, RenderClientError> {
        let response = self
            .client
            .get(format!("{}/queue", self.base_url))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Fetch the terminal outcome for a job, if the engine has one.
    ///
    /// Sends `GET /history/{id}`. A 404 or an empty body means the
    /// outcome is not (yet) recorded and maps to `Ok(None)`.
    pub async fn get_history(
        &self,
        external_id: &str,
    ) -> Result<Option<HistoryOutcome>, RenderClientError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.base_url, external_id))
            .send()
            .await?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }

        let response = Self::ensure_success(response).await?;
        let body: serde_json::Value = response.json().await?;
        if body.is_null() || body.as_object().is_some_and(|o| o.is_empty()) {
            return Ok(None);
        }
        let outcome: HistoryOutcome = serde_json::from_value(body).map_err(|e| {
            RenderClientError::Api {
                status: 200,
                body: format!("unparseable history entry: {e}"),
            }
        })?;
        Ok(Some(outcome))
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`RenderClientError::Api`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, RenderClientError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(RenderClientError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RenderClientError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
