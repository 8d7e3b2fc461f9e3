//! Job queries: record lookup, live progress, and the statistics
//! snapshot.

use axum::extract::{Path, State};
use axum::Json;

use kiln_core::error::CoreError;
use kiln_core::job::{Job, ProgressUpdate};
use kiln_core::store::JobStore;
use kiln_core::types::DbId;

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::stats;

/// GET /jobs/{id} -- full job record.
///
/// Falls back to the durable store for jobs from a previous process
/// lifetime.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<Json<Job>> {
    if let Some(job) = state.registry.get(job_id).await {
        return Ok(Json(job));
    }

    let store = kiln_db::PgJobStore::new(state.pool.clone());
    match store.read(job_id).await? {
        Some(job) => Ok(Json(job)),
        None => Err(AppError::Core(CoreError::NotFound {
            entity: "job",
            id: job_id,
        })),
    }
}

/// GET /jobs/{id}/progress -- current progress for a monitored job.
///
/// When the last poll carried no estimate, one is computed on demand
/// from the rolling statistics.
pub async fn get_progress(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<Json<ProgressUpdate>> {
    let mut update = state
        .monitor
        .get_progress(job_id)
        .await
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "job",
            id: job_id,
        }))?;
    if update.estimated_completion.is_none() {
        update.estimated_completion = state.monitor.estimate_completion(job_id).await;
    }

    Ok(Json(update))
}

/// GET /statistics -- the queue statistics snapshot.
pub async fn get_statistics(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(stats::queue_statistics(&state).await)
}
