//! Job model and status state machine.
//!
//! The render service reports no lifecycle events of its own, so every
//! status here is *inferred* from queue/history snapshots by the
//! progress monitor. The state machine enforces that inference can only
//! move forward: a job never regresses, and terminal states are final.

use serde::{Deserialize, Serialize};

use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Progress floor constants
// ---------------------------------------------------------------------------

/// Progress reported for a job sighted in the pending list.
/// Small and nonzero: "accepted by the engine, not yet started".
pub const QUEUED_PROGRESS_PERCENT: i16 = 5;

/// Heuristic progress for a running job whose type exposes no step
/// counters. Fixed midpoint rather than a synthetic moving value.
pub const PROCESSING_MIDPOINT_PERCENT: i16 = 50;

/// Progress for a job that left the running queue but whose history
/// entry has not appeared yet.
pub const COMPLETING_PROGRESS_PERCENT: i16 = 90;

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a generation job.
///
/// `Failed` and `TimedOut` are reachable from any non-terminal state.
/// All other transitions must strictly increase [`JobStatus::rank`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted to the render service, not yet observed in any queue.
    Initializing,
    /// Present in the engine's pending list.
    Queued,
    /// Present in the engine's running list.
    Processing,
    /// Left the running list; terminal outcome not yet visible in history.
    Completing,
    /// History reported success.
    Completed,
    /// History reported an explicit failure.
    Failed,
    /// Unseen in queue and history beyond the configured threshold.
    /// Cause unknown — deliberately distinct from `Failed`.
    TimedOut,
}

impl JobStatus {
    /// Monotonic rank along the success path. Terminal failure states
    /// share the top rank because they are reachable from anywhere.
    pub fn rank(self) -> u8 {
        match self {
            Self::Initializing => 0,
            Self::Queued => 1,
            Self::Processing => 2,
            Self::Completing => 3,
            Self::Completed => 4,
            Self::Failed | Self::TimedOut => 5,
        }
    }

    /// Whether this status ends the job's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }

    /// Check whether a transition from `self` to `to` is valid.
    ///
    /// Rules:
    /// - no transitions out of a terminal state;
    /// - `Failed`/`TimedOut` reachable from any non-terminal state;
    /// - otherwise the rank must strictly increase (skipping states is
    ///   fine — a fast job goes `Initializing → Completed` directly).
    pub fn can_transition(self, to: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(to, Self::Failed | Self::TimedOut) {
            return true;
        }
        to.rank() > self.rank()
    }

    /// String form for persistence and the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completing => "completing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    /// Parse the persisted string form. Unknown values map to `Failed`
    /// so a corrupted row can never resurrect as active.
    pub fn from_str(s: &str) -> Self {
        match s {
            "initializing" => Self::Initializing,
            "queued" => Self::Queued,
            "processing" => Self::Processing,
            "completing" => Self::Completing,
            "completed" => Self::Completed,
            "timed_out" => Self::TimedOut,
            _ => Self::Failed,
        }
    }

    /// Minimum progress percentage implied by this status.
    pub fn progress_floor(self) -> i16 {
        match self {
            Self::Initializing => 0,
            Self::Queued => QUEUED_PROGRESS_PERCENT,
            Self::Processing => PROCESSING_MIDPOINT_PERCENT,
            Self::Completing => COMPLETING_PROGRESS_PERCENT,
            Self::Completed => 100,
            // Terminal failures freeze progress where it was.
            Self::Failed | Self::TimedOut => 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One submitted unit of generation work, tracked end-to-end.
///
/// Owned exclusively by the job registry; mutated only by the progress
/// monitor and at submission time.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: DbId,
    /// Identifier assigned by the render service at submission.
    pub external_id: String,
    /// The business entity this job replenishes.
    pub entity_id: DbId,
    pub job_type: String,
    pub status: JobStatus,
    /// 0..=100, non-decreasing while non-terminal.
    pub progress_percent: i16,
    pub current_step: Option<i32>,
    pub total_steps: Option<i32>,
    pub submitted_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub estimated_completion: Option<Timestamp>,
    pub error_message: Option<String>,
}

impl Job {
    /// Create a freshly submitted job in `Initializing` state.
    pub fn new(
        id: DbId,
        external_id: impl Into<String>,
        entity_id: DbId,
        job_type: impl Into<String>,
        submitted_at: Timestamp,
    ) -> Self {
        Self {
            id,
            external_id: external_id.into(),
            entity_id,
            job_type: job_type.into(),
            status: JobStatus::Initializing,
            progress_percent: 0,
            current_step: None,
            total_steps: None,
            submitted_at,
            started_at: None,
            completed_at: None,
            estimated_completion: None,
            error_message: None,
        }
    }

    /// Build the transient DTO broadcast to subscribers.
    pub fn progress_update(&self) -> ProgressUpdate {
        ProgressUpdate {
            job_id: self.id,
            status: self.status,
            progress_percent: self.progress_percent,
            estimated_completion: self.estimated_completion,
            error: self.error_message.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// ProgressUpdate
// ---------------------------------------------------------------------------

/// Transient progress DTO, serialized into `progress_update` messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub job_id: DbId,
    pub status: JobStatus,
    pub progress_percent: i16,
    pub estimated_completion: Option<Timestamp>,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
