use std::sync::Arc;

use tokio::sync::RwLock;

use kiln_core::stats::JobStatisticsStore;
use kiln_engine::{JobRegistry, ProgressMonitor, ReplenishmentScheduler};

use crate::ws::WsHub;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: kiln_db::DbPool,
    /// WebSocket connection hub (browser clients).
    pub hub: Arc<WsHub>,
    /// Authoritative job records.
    pub registry: Arc<JobRegistry>,
    /// Poll-driven progress monitor.
    pub monitor: Arc<ProgressMonitor>,
    /// Approval-driven replenishment scheduler.
    pub scheduler: Arc<ReplenishmentScheduler>,
    /// Rolling completion/failure statistics.
    pub stats: Arc<RwLock<JobStatisticsStore>>,
}
