pub mod approval;
pub mod health;
pub mod jobs;

use axum::routing::{get, post, put};
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /ws                                    WebSocket (progress feed)
///
/// /approvals                             record approval/rejection (POST)
/// /entities/{id}/reset-rejections        clear a reject-streak pause (POST)
/// /replenishment                         per-entity counter snapshot (GET)
/// /replenishment/target                  adjust the live quota (PUT)
///
/// /jobs/{id}                             job record (GET)
/// /jobs/{id}/progress                    current progress + estimate (GET)
/// /statistics                            queue statistics snapshot (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/approvals", post(approval::record_approval))
        .route(
            "/entities/{id}/reset-rejections",
            post(approval::reset_rejections),
        )
        .route("/replenishment", get(approval::get_replenishment_state))
        .route(
            "/replenishment/target",
            put(approval::set_replenishment_target),
        )
        .route("/jobs/{id}", get(jobs::get_job))
        .route("/jobs/{id}/progress", get(jobs::get_progress))
        .route("/statistics", get(jobs::get_statistics))
}
