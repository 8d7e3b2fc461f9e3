//! Approval intake: the external review surface posts one signal per
//! reviewed output, and each signal drives one replenishment cycle.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use kiln_core::replenish::ApprovalEvent;
use kiln_core::types::DbId;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ApprovalRequest {
    pub entity_id: DbId,
    pub approved: bool,
}

/// POST /approvals -- record one approval/rejection signal.
///
/// Returns 202: the signal is accepted and the replenishment decision
/// happens behind the entity's lock, not in the request path's result.
pub async fn record_approval(
    State(state): State<AppState>,
    Json(request): Json<ApprovalRequest>,
) -> AppResult<StatusCode> {
    if request.entity_id <= 0 {
        return Err(AppError::BadRequest("entity_id must be positive".into()));
    }

    state
        .scheduler
        .handle_approval(ApprovalEvent {
            entity_id: request.entity_id,
            approved: request.approved,
            timestamp: Utc::now(),
        })
        .await;

    Ok(StatusCode::ACCEPTED)
}

/// GET /replenishment -- per-entity counter snapshot plus the live quota.
pub async fn get_replenishment_state(
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let entities = state.scheduler.state_snapshot().await;
    Json(json!({
        "target": state.scheduler.target(),
        "active_generations": state.scheduler.active_generations(),
        "entities": entities,
    }))
}

#[derive(Debug, Deserialize)]
pub struct TargetRequest {
    pub target: u32,
}

/// PUT /replenishment/target -- adjust the quota for all entities.
pub async fn set_replenishment_target(
    State(state): State<AppState>,
    Json(request): Json<TargetRequest>,
) -> Json<serde_json::Value> {
    state.scheduler.set_target(request.target);
    Json(json!({ "target": request.target }))
}

/// POST /entities/{id}/reset-rejections -- clear a reject-streak pause.
pub async fn reset_rejections(
    State(state): State<AppState>,
    Path(entity_id): Path<DbId>,
) -> AppResult<Json<serde_json::Value>> {
    if !state.scheduler.reset_rejections(entity_id).await {
        return Err(AppError::Core(kiln_core::error::CoreError::NotFound {
            entity: "entity",
            id: entity_id,
        }));
    }
    Ok(Json(json!({ "entity_id": entity_id, "reset": true })))
}
