//! Queue statistics assembly.
//!
//! One snapshot combining the monitor's live counts, the registry's
//! active set, the scheduler's in-flight batches, and the rolling
//! completion/failure statistics. Served both over HTTP and as the
//! `queue_statistics` WebSocket reply.

use serde_json::json;

use kiln_engine::events::MSG_TYPE_QUEUE_STATISTICS;

use crate::state::AppState;

/// Build the statistics snapshot payload.
pub async fn queue_statistics(state: &AppState) -> serde_json::Value {
    let counts = state.monitor.queue_counts().await;
    let snapshot = state.stats.read().await.snapshot();

    json!({
        "type": MSG_TYPE_QUEUE_STATISTICS,
        "queue": counts,
        "active_jobs": state.registry.active_count().await,
        "active_generations": state.scheduler.active_generations(),
        "completions": snapshot.completions,
        "failures": snapshot.failures,
        "timeouts": snapshot.timeouts,
    })
}
