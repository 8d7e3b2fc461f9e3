//! Bridge from the engine's job event feed to the WebSocket hub.
//!
//! Every [`JobEvent`] becomes one `progress_update` message fanned out
//! to all connected clients. Terminal variants carry their extra
//! context (duration, error) alongside the shared update fields.

use std::sync::Arc;

use axum::extract::ws::Message;
use serde_json::json;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use kiln_engine::events::MSG_TYPE_PROGRESS_UPDATE;
use kiln_engine::JobEvent;

use crate::ws::WsHub;

/// Spawn the event bridge task. Runs until cancelled or until the
/// event channel closes.
pub fn start_event_bridge(
    hub: Arc<WsHub>,
    mut events: broadcast::Receiver<JobEvent>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => {
                        let payload = event_payload(&event);
                        hub.broadcast(Message::Text(payload.to_string().into())).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event bridge lagged behind the event feed");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        tracing::info!("Event bridge stopped");
    })
}

/// Flatten a job event into one wire message.
fn event_payload(event: &JobEvent) -> serde_json::Value {
    let update = event.update();
    let mut payload = json!({
        "type": MSG_TYPE_PROGRESS_UPDATE,
        "job_id": update.job_id,
        "status": update.status,
        "progress_percent": update.progress_percent,
        "estimated_completion": update.estimated_completion,
        "error": update.error,
    });

    if let Some(map) = payload.as_object_mut() {
        if let JobEvent::Completed { duration_secs, .. } = event {
            map.insert("duration_secs".into(), json!(duration_secs));
        }
    }

    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::job::{JobStatus, ProgressUpdate};

    fn update(status: JobStatus, percent: i16) -> ProgressUpdate {
        ProgressUpdate {
            job_id: 7,
            status,
            progress_percent: percent,
            estimated_completion: None,
            error: None,
        }
    }

    #[test]
    fn progress_payload_carries_update_fields() {
        let payload = event_payload(&JobEvent::Progress {
            update: update(JobStatus::Processing, 60),
        });
        assert_eq!(payload["type"], "progress_update");
        assert_eq!(payload["job_id"], 7);
        assert_eq!(payload["status"], "processing");
        assert_eq!(payload["progress_percent"], 60);
    }

    #[test]
    fn completed_payload_includes_duration() {
        let payload = event_payload(&JobEvent::Completed {
            job_id: 7,
            entity_id: 1,
            job_type: "portrait".into(),
            duration_secs: 12.5,
            update: update(JobStatus::Completed, 100),
        });
        assert_eq!(payload["duration_secs"], 12.5);
        assert_eq!(payload["status"], "completed");
    }
}
