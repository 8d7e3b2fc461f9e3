//! Replenishment scheduler: approval signals in, throttled batch
//! submissions out.
//!
//! Each entity gets one lock-guarded slot holding its counters; a
//! submission decision runs entirely under that lock, so two approval
//! events for the same entity can never race into a double submission.
//! The guard chain itself is pure and lives in `kiln_core::replenish`;
//! this module owns the locking, the global concurrency counter, and
//! the release path driven by terminal job events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use kiln_core::error::CoreError;
use kiln_core::replenish::{
    evaluate_guards, ApprovalEvent, ReplenishmentConfig, ReplenishmentState, SkipReason,
};
use kiln_core::types::DbId;
use kiln_render::client::RenderClientError;

use crate::events::JobEvent;

// ---------------------------------------------------------------------------
// Submission seam
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("render service rejected submission: {0}")]
    Render(#[from] RenderClientError),
    #[error("storage failure during submission: {0}")]
    Storage(#[from] CoreError),
}

/// Builds and submits a generation batch for an entity, returning the
/// internal ids of the created jobs. The API crate provides the real
/// implementation; tests script it.
#[async_trait]
pub trait Submission: Send + Sync {
    async fn submit_batch(&self, entity_id: DbId, count: u32) -> Result<Vec<DbId>, SubmitError>;
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Counters plus the in-flight job tally for one entity. Everything in
/// here is mutated under the entity's mutex.
#[derive(Debug)]
struct EntitySlot {
    state: ReplenishmentState,
    /// Jobs from the current batch still being generated.
    in_flight_jobs: u32,
}

/// Approval-driven feedback controller keeping each entity stocked to
/// its approved-output quota.
pub struct ReplenishmentScheduler {
    slots: RwLock<HashMap<DbId, Arc<Mutex<EntitySlot>>>>,
    /// Entities with a batch currently in flight, across all slots.
    global_active: AtomicUsize,
    /// Live quota; adjustable at runtime without touching the rest of
    /// the configured throttles.
    target: AtomicU32,
    submitter: Arc<dyn Submission>,
    config: ReplenishmentConfig,
}

impl ReplenishmentScheduler {
    pub fn new(submitter: Arc<dyn Submission>, config: ReplenishmentConfig) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            global_active: AtomicUsize::new(0),
            target: AtomicU32::new(config.target),
            submitter,
            config,
        }
    }

    pub fn config(&self) -> &ReplenishmentConfig {
        &self.config
    }

    /// Current approved-output quota.
    pub fn target(&self) -> u32 {
        self.target.load(Ordering::SeqCst)
    }

    /// Adjust the quota for all entities. Takes effect on the next
    /// replenishment cycle.
    pub fn set_target(&self, target: u32) {
        self.target.store(target, Ordering::SeqCst);
        tracing::info!(target, "Replenishment target updated");
    }

    fn effective_config(&self) -> ReplenishmentConfig {
        let mut config = self.config.clone();
        config.target = self.target();
        config
    }

    /// Number of entities with a batch in flight right now.
    pub fn active_generations(&self) -> usize {
        self.global_active.load(Ordering::SeqCst)
    }

    async fn slot(&self, entity_id: DbId) -> Arc<Mutex<EntitySlot>> {
        if let Some(slot) = self.slots.read().await.get(&entity_id) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(entity_id).or_insert_with(|| {
            Arc::new(Mutex::new(EntitySlot {
                state: ReplenishmentState::new(Utc::now()),
                in_flight_jobs: 0,
            }))
        }))
    }

    /// Process one approval/rejection signal.
    ///
    /// Records the outcome, then runs one replenishment cycle for the
    /// entity: guard chain, and on a full pass a batch submission. The
    /// whole cycle holds the entity's lock, including the submission
    /// itself, so concurrent signals serialize per entity.
    pub async fn handle_approval(&self, event: ApprovalEvent) {
        let slot = self.slot(event.entity_id).await;
        let mut slot = slot.lock().await;

        slot.state.record_outcome(event.approved);
        slot.state.roll_daily_window(event.timestamp);
        tracing::debug!(
            entity_id = event.entity_id,
            approved = event.approved,
            approved_count = slot.state.approved_count,
            consecutive_rejects = slot.state.consecutive_rejects,
            "Approval signal recorded",
        );

        self.try_replenish(event.entity_id, &mut slot).await;
    }

    /// Run the guard chain and submit on a pass. Caller holds the
    /// entity lock.
    async fn try_replenish(&self, entity_id: DbId, slot: &mut EntitySlot) {
        let now = Utc::now();
        let config = self.effective_config();
        // An entity whose own batch is in flight fails guard two before
        // the global count matters, so the raw count is safe here.
        let global_active = self.global_active.load(Ordering::SeqCst);

        if let Err(reason) = evaluate_guards(&slot.state, &config, now, global_active) {
            tracing::debug!(
                entity_id,
                reason = reason.as_str(),
                "Replenishment cycle skipped",
            );
            return;
        }

        // The load above is only advisory for the concurrency guard:
        // entities hold different locks, so the slot must be reserved
        // atomically or N racing entities could all pass the cap.
        let reserved = self.global_active.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |active| (active < config.max_concurrent).then_some(active + 1),
        );
        if reserved.is_err() {
            tracing::debug!(
                entity_id,
                reason = SkipReason::ConcurrencyCapReached.as_str(),
                "Replenishment cycle skipped",
            );
            return;
        }

        match self
            .submitter
            .submit_batch(entity_id, config.batch_size)
            .await
        {
            Ok(job_ids) => {
                slot.state.record_submission(config.batch_size, now);
                slot.in_flight_jobs = job_ids.len() as u32;
                tracing::info!(
                    entity_id,
                    batch_size = job_ids.len(),
                    daily_count = slot.state.daily_count,
                    "Replenishment batch submitted",
                );
            }
            Err(e) => {
                // Give the reserved slot back; the next signal retries.
                self.global_active.fetch_sub(1, Ordering::SeqCst);
                tracing::warn!(entity_id, error = %e, "Replenishment batch submission failed");
            }
        }
    }

    /// Consume terminal job events until cancelled, releasing each
    /// entity's active flag once its whole batch has resolved.
    pub async fn run(&self, cancel: CancellationToken, mut events: broadcast::Receiver<JobEvent>) {
        tracing::info!("Replenishment scheduler started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Replenishment scheduler shutting down");
                    break;
                }
                received = events.recv() => match received {
                    Ok(event) => {
                        if let Some(entity_id) = event.terminal_entity() {
                            let produced_output = matches!(event, JobEvent::Completed { .. });
                            self.release_job(entity_id, produced_output).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Scheduler lagged behind the event feed");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    /// One job from an entity's batch reached a terminal state.
    ///
    /// `produced_output` is true for a completed job, whose output now
    /// waits for review; failed and timed-out jobs will never be
    /// reviewed, so their pending slot is released here.
    pub async fn release_job(&self, entity_id: DbId, produced_output: bool) {
        let slot = self.slot(entity_id).await;
        let mut slot = slot.lock().await;
        if !produced_output {
            slot.state.pending_count = slot.state.pending_count.saturating_sub(1);
        }
        if slot.in_flight_jobs == 0 {
            return;
        }
        slot.in_flight_jobs -= 1;
        if slot.in_flight_jobs == 0 && slot.state.active_generation {
            slot.state.active_generation = false;
            self.global_active.fetch_sub(1, Ordering::SeqCst);
            tracing::debug!(entity_id, "Generation batch resolved, entity released");
        }
    }

    /// Manual operator reset for an entity paused by its reject streak.
    /// Returns `false` when the entity has no replenishment state yet.
    pub async fn reset_rejections(&self, entity_id: DbId) -> bool {
        let Some(slot) = self.slots.read().await.get(&entity_id).map(Arc::clone) else {
            return false;
        };
        let mut slot = slot.lock().await;
        slot.state.consecutive_rejects = 0;
        tracing::info!(entity_id, "Rejection streak reset");
        true
    }

    /// Point-in-time copy of every entity's counters, for diagnostics.
    pub async fn state_snapshot(&self) -> HashMap<DbId, ReplenishmentState> {
        let slots: Vec<(DbId, Arc<Mutex<EntitySlot>>)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(id, slot)| (*id, Arc::clone(slot)))
            .collect();

        let mut snapshot = HashMap::with_capacity(slots.len());
        for (id, slot) in slots {
            snapshot.insert(id, slot.lock().await.state.clone());
        }
        snapshot
    }
}
