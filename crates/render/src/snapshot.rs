//! Wire DTOs for the render service's queue and history endpoints.

use serde::{Deserialize, Serialize};

/// A job currently executing on the render service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningJob {
    /// The engine-assigned external job id.
    pub id: String,
    /// Current generation step, when the job type exposes step counters.
    #[serde(default)]
    pub current_step: Option<i32>,
    #[serde(default)]
    pub total_steps: Option<i32>,
}

/// A job accepted by the render service but not yet started.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingJob {
    pub id: String,
}

/// One poll of the render service's execution queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueSnapshot {
    #[serde(default)]
    pub running: Vec<RunningJob>,
    #[serde(default)]
    pub pending: Vec<PendingJob>,
}

impl QueueSnapshot {
    /// Find the running entry for an external id, if present.
    pub fn running_entry(&self, external_id: &str) -> Option<&RunningJob> {
        self.running.iter().find(|j| j.id == external_id)
    }

    /// Whether an external id sits in the pending list.
    pub fn is_pending(&self, external_id: &str) -> bool {
        self.pending.iter().any(|j| j.id == external_id)
    }
}

/// Terminal outcome recorded in the render service's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryOutcome {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    /// Wall-clock execution time as reported by the engine, if any.
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_snapshot_lookups() {
        let snap = QueueSnapshot {
            running: vec![RunningJob {
                id: "run-1".into(),
                current_step: Some(12),
                total_steps: Some(30),
            }],
            pending: vec![PendingJob { id: "pend-1".into() }],
        };
        assert!(snap.running_entry("run-1").is_some());
        assert!(snap.running_entry("pend-1").is_none());
        assert!(snap.is_pending("pend-1"));
        assert!(!snap.is_pending("run-1"));
    }

    #[test]
    fn snapshot_deserializes_with_missing_fields() {
        let snap: QueueSnapshot =
            serde_json::from_str(r#"{"running":[{"id":"a"}]}"#).unwrap();
        assert_eq!(snap.running.len(), 1);
        assert!(snap.running[0].current_step.is_none());
        assert!(snap.pending.is_empty());
    }

    #[test]
    fn history_outcome_defaults() {
        let outcome: HistoryOutcome = serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert!(outcome.success);
        assert!(outcome.error.is_none());
        assert!(outcome.duration_secs.is_none());
    }
}
