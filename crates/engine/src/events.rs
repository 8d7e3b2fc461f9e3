//! Job lifecycle events emitted by the progress monitor.
//!
//! A single tagged enum over one broadcast channel is the only
//! dispatch point: the WebSocket bridge, the replenishment scheduler,
//! and any in-process listener all subscribe to the same feed.

use serde::Serialize;

use kiln_core::job::ProgressUpdate;
use kiln_core::types::DbId;

/// WebSocket message type for every job update pushed to subscribers.
pub const MSG_TYPE_PROGRESS_UPDATE: &str = "progress_update";

/// WebSocket message type for queue statistics responses.
pub const MSG_TYPE_QUEUE_STATISTICS: &str = "queue_statistics";

/// A state change observed for a monitored job.
///
/// Every variant carries the [`ProgressUpdate`] broadcast to
/// subscribers; terminal variants add the fields the scheduler needs
/// to release its per-entity locks.
#[derive(Debug, Clone, Serialize)]
pub enum JobEvent {
    /// Non-terminal progress (queued, processing, completing).
    Progress { update: ProgressUpdate },

    /// The engine's history reported success.
    Completed {
        job_id: DbId,
        entity_id: DbId,
        job_type: String,
        duration_secs: f64,
        update: ProgressUpdate,
    },

    /// The engine's history reported an explicit failure.
    Failed {
        job_id: DbId,
        entity_id: DbId,
        job_type: String,
        error: String,
        update: ProgressUpdate,
    },

    /// The job vanished from queue and history beyond its threshold.
    TimedOut {
        job_id: DbId,
        entity_id: DbId,
        job_type: String,
        update: ProgressUpdate,
    },
}

impl JobEvent {
    /// The progress update carried by any variant.
    pub fn update(&self) -> &ProgressUpdate {
        match self {
            Self::Progress { update }
            | Self::Completed { update, .. }
            | Self::Failed { update, .. }
            | Self::TimedOut { update, .. } => update,
        }
    }

    /// Entity released by this event, for terminal variants.
    pub fn terminal_entity(&self) -> Option<DbId> {
        match self {
            Self::Progress { .. } => None,
            Self::Completed { entity_id, .. }
            | Self::Failed { entity_id, .. }
            | Self::TimedOut { entity_id, .. } => Some(*entity_id),
        }
    }
}
