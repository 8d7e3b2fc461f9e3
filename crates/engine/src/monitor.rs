//! Progress monitor: one repeating poll task per process.
//!
//! Each cycle fetches the render service's queue snapshot once, then
//! resolves every monitored job against it (and against the history
//! collection for jobs that disappeared). A job's new state is fully
//! resolved — registry updated, statistics recorded — before its event
//! is broadcast, which gives subscribers strictly non-decreasing status
//! progression per job.
//!
//! Transient render service failures never mutate job state. The loop
//! backs off exponentially and only after the configured consecutive-
//! failure ceiling finalizes the watched set as timed out instead of
//! silently dropping it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use kiln_core::job::{Job, JobStatus, ProgressUpdate};
use kiln_core::stats::{error_signature, JobStatisticsStore};
use kiln_core::types::{DbId, Timestamp};
use kiln_render::backoff::{next_delay, RetryConfig};
use kiln_render::client::RenderClientError;
use kiln_render::snapshot::QueueSnapshot;

use crate::events::JobEvent;
use crate::registry::{JobRegistry, Observation};
use crate::render::RenderEngine;

/// Broadcast channel capacity for job events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunables for the poll loop.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between poll cycles.
    pub poll_interval: Duration,
    /// Seconds a job may stay unseen in queue and history before it is
    /// finalized as timed out.
    pub default_timeout_secs: i64,
    /// Per-job-type timeout overrides. Observed completion times vary
    /// by an order of magnitude across job types.
    pub timeout_overrides: HashMap<String, i64>,
    /// Consecutive failed poll cycles tolerated before the watched set
    /// is finalized as timed out.
    pub max_consecutive_poll_failures: u32,
    /// Backoff between failed poll cycles.
    pub retry: RetryConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            default_timeout_secs: 300,
            timeout_overrides: HashMap::new(),
            max_consecutive_poll_failures: 5,
            retry: RetryConfig::default(),
        }
    }
}

impl MonitorConfig {
    fn timeout_secs_for(&self, job_type: &str) -> i64 {
        self.timeout_overrides
            .get(job_type)
            .copied()
            .unwrap_or(self.default_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// Per-job polling bookkeeping. Lives outside the registry because it
/// belongs to the poller, not to the job record.
#[derive(Debug, Clone)]
struct WatchedJob {
    external_id: String,
    job_type: String,
    /// Set when the job is absent from queue and history; cleared on
    /// any sighting. Drives the timeout decision.
    unseen_since: Option<Timestamp>,
    /// Last observed (step, at) pair for per-step duration sampling.
    last_step: Option<(i32, Timestamp)>,
}

/// Live counts from the most recent successful poll.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueCounts {
    pub running: usize,
    pub pending: usize,
    pub monitored: usize,
}

/// Polls the render service and turns queue/history snapshots into a
/// monotonic per-job progress feed.
pub struct ProgressMonitor {
    registry: Arc<JobRegistry>,
    engine: Arc<dyn RenderEngine>,
    stats: Arc<RwLock<JobStatisticsStore>>,
    config: MonitorConfig,
    watched: Mutex<HashMap<DbId, WatchedJob>>,
    event_tx: broadcast::Sender<JobEvent>,
    last_counts: RwLock<QueueCounts>,
}

impl ProgressMonitor {
    pub fn new(
        registry: Arc<JobRegistry>,
        engine: Arc<dyn RenderEngine>,
        stats: Arc<RwLock<JobStatisticsStore>>,
        config: MonitorConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            registry,
            engine,
            stats,
            config,
            watched: Mutex::new(HashMap::new()),
            event_tx,
            last_counts: RwLock::new(QueueCounts::default()),
        }
    }

    /// Subscribe to job events. The WebSocket bridge and the
    /// replenishment scheduler are the standing subscribers.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    /// Start polling a job. Returns `false` if the job id is already
    /// watched — at most one active poller owns a given job id.
    pub async fn monitor_job(&self, job_id: DbId, external_id: &str, job_type: &str) -> bool {
        let mut watched = self.watched.lock().await;
        if watched.contains_key(&job_id) {
            return false;
        }
        watched.insert(
            job_id,
            WatchedJob {
                external_id: external_id.to_string(),
                job_type: job_type.to_string(),
                unseen_since: None,
                last_step: None,
            },
        );
        tracing::debug!(job_id, external_id, job_type, "Job added to polling set");
        true
    }

    /// Current progress for a job, if it is known to the registry.
    pub async fn get_progress(&self, job_id: DbId) -> Option<ProgressUpdate> {
        self.registry.get(job_id).await.map(|job| job.progress_update())
    }

    /// Statistics-driven completion estimate for a non-terminal job.
    pub async fn estimate_completion(&self, job_id: DbId) -> Option<Timestamp> {
        let job = self.registry.get(job_id).await?;
        if job.status.is_terminal() {
            return None;
        }
        let remaining_steps = match (job.current_step, job.total_steps) {
            (Some(cur), Some(total)) => Some((total - cur).max(0)),
            _ => None,
        };
        let stats = self.stats.read().await;
        let secs =
            stats.estimate_remaining_secs(&job.job_type, job.progress_percent, remaining_steps)?;
        Some(Utc::now() + chrono::Duration::milliseconds((secs * 1000.0) as i64))
    }

    /// Live counts from the most recent successful poll.
    pub async fn queue_counts(&self) -> QueueCounts {
        *self.last_counts.read().await
    }

    /// Run the poll loop until the cancellation token is triggered.
    ///
    /// An in-progress cycle always finishes before the loop exits, so
    /// shutdown drains rather than truncates.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut consecutive_failures: u32 = 0;
        let mut delay = self.config.retry.initial_delay;

        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Progress monitor started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Progress monitor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.poll_cycle().await {
                        Ok(()) => {
                            consecutive_failures = 0;
                            delay = self.config.retry.initial_delay;
                        }
                        Err(e) => {
                            consecutive_failures += 1;
                            tracing::warn!(
                                error = %e,
                                consecutive_failures,
                                "Poll cycle failed",
                            );
                            if consecutive_failures >= self.config.max_consecutive_poll_failures {
                                self.timeout_all_watched().await;
                                consecutive_failures = 0;
                                delay = self.config.retry.initial_delay;
                                continue;
                            }
                            // Back off before the next attempt, respecting cancellation.
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(delay) => {}
                            }
                            delay = next_delay(delay, &self.config.retry);
                        }
                    }
                }
            }
        }
    }

    /// One poll cycle: a single queue fetch, then per-job resolution.
    ///
    /// Public so tests can drive cycles without timing. Errors are
    /// transient render service failures; no job state was mutated.
    pub async fn poll_cycle(&self) -> Result<(), RenderClientError> {
        let snapshot: Vec<(DbId, WatchedJob)> = {
            let watched = self.watched.lock().await;
            let mut entries: Vec<_> =
                watched.iter().map(|(id, w)| (*id, w.clone())).collect();
            // Stable order keeps event interleaving deterministic.
            entries.sort_by_key(|(id, _)| *id);
            entries
        };

        if snapshot.is_empty() {
            *self.last_counts.write().await = QueueCounts::default();
            return Ok(());
        }

        let queue = self.engine.get_queue().await?;
        *self.last_counts.write().await = QueueCounts {
            running: queue.running.len(),
            pending: queue.pending.len(),
            monitored: snapshot.len(),
        };

        for (job_id, watch) in snapshot {
            self.resolve_job(job_id, &watch, &queue).await?;
        }

        Ok(())
    }

    // ---- per-job resolution ----

    async fn resolve_job(
        &self,
        job_id: DbId,
        watch: &WatchedJob,
        queue: &QueueSnapshot,
    ) -> Result<(), RenderClientError> {
        let Some(job) = self.registry.get(job_id).await else {
            // Registry no longer knows this job; stop polling it.
            self.watched.lock().await.remove(&job_id);
            return Ok(());
        };

        if let Some(entry) = queue.running_entry(&watch.external_id) {
            self.mark_seen(job_id).await;
            self.observe_running(&job, entry.current_step, entry.total_steps)
                .await;
        } else if queue.is_pending(&watch.external_id) {
            self.mark_seen(job_id).await;
            self.observe(Observation::status_only(job_id, JobStatus::Queued))
                .await;
        } else {
            self.resolve_absent(&job, watch).await?;
        }

        Ok(())
    }

    /// The job is in the running list: Processing, with step-derived
    /// progress when the job type exposes counters, else the fixed
    /// midpoint floor.
    async fn observe_running(
        &self,
        job: &Job,
        current_step: Option<i32>,
        total_steps: Option<i32>,
    ) {
        let now = Utc::now();

        let progress = match (current_step, total_steps) {
            (Some(cur), Some(total)) if total > 0 => {
                // Cap below 100: only history confirms completion.
                Some(((cur as i64 * 100 / total as i64) as i16).clamp(1, 99))
            }
            _ => None,
        };

        // Sample per-step duration while steps advance.
        if let Some(cur) = current_step {
            let mut watched = self.watched.lock().await;
            if let Some(watch) = watched.get_mut(&job.id) {
                if let Some((prev_step, prev_at)) = watch.last_step {
                    let advanced = cur - prev_step;
                    if advanced > 0 {
                        let elapsed = (now - prev_at).num_milliseconds() as f64 / 1000.0;
                        let secs_per_step = elapsed / f64::from(advanced);
                        self.stats
                            .write()
                            .await
                            .record_step_duration(&job.job_type, secs_per_step);
                    }
                }
                if watch.last_step.map(|(s, _)| s) != Some(cur) {
                    watch.last_step = Some((cur, now));
                }
            }
        }

        // Only attach an estimate when the visible state is changing,
        // so a stalled job does not spam updates.
        let advancing = job.status != JobStatus::Processing
            || progress.is_some_and(|p| p > job.progress_percent);
        let estimated_completion = if advancing {
            let remaining_steps = match (current_step, total_steps) {
                (Some(cur), Some(total)) => Some((total - cur).max(0)),
                _ => None,
            };
            let pct = progress.unwrap_or(job.progress_percent);
            let stats = self.stats.read().await;
            stats
                .estimate_remaining_secs(&job.job_type, pct, remaining_steps)
                .map(|secs| now + chrono::Duration::milliseconds((secs * 1000.0) as i64))
        } else {
            None
        };

        self.observe(Observation {
            job_id: job.id,
            status: JobStatus::Processing,
            progress_percent: progress,
            current_step,
            total_steps,
            estimated_completion,
        })
        .await
    }

    /// The job is absent from running and pending: consult history,
    /// fall back to the completing/timeout paths.
    async fn resolve_absent(
        &self,
        job: &Job,
        watch: &WatchedJob,
    ) -> Result<(), RenderClientError> {
        match self.engine.get_history(&watch.external_id).await? {
            Some(outcome) if outcome.success => {
                let Some(finalized) =
                    self.registry.finalize(job.id, JobStatus::Completed, None).await
                else {
                    self.unwatch(job.id).await;
                    return Ok(());
                };
                // Prefer the engine-reported duration; fall back to
                // submission-to-completion wall time.
                let duration_secs = outcome.duration_secs.unwrap_or_else(|| {
                    let end = finalized.completed_at.unwrap_or_else(Utc::now);
                    (end - finalized.submitted_at).num_milliseconds() as f64 / 1000.0
                });
                self.stats
                    .write()
                    .await
                    .record_completion(&finalized.job_type, duration_secs);
                self.unwatch(job.id).await;
                self.emit(JobEvent::Completed {
                    job_id: finalized.id,
                    entity_id: finalized.entity_id,
                    job_type: finalized.job_type.clone(),
                    duration_secs,
                    update: finalized.progress_update(),
                });
            }
            Some(outcome) => {
                let error = outcome
                    .error
                    .unwrap_or_else(|| "render engine reported failure".to_string());
                let Some(finalized) = self
                    .registry
                    .finalize(job.id, JobStatus::Failed, Some(error.clone()))
                    .await
                else {
                    self.unwatch(job.id).await;
                    return Ok(());
                };
                self.stats
                    .write()
                    .await
                    .record_failure(&finalized.job_type, &error_signature(&error));
                self.unwatch(job.id).await;
                self.emit(JobEvent::Failed {
                    job_id: finalized.id,
                    entity_id: finalized.entity_id,
                    job_type: finalized.job_type.clone(),
                    error,
                    update: finalized.progress_update(),
                });
            }
            None => {
                self.resolve_unseen(job, watch).await;
            }
        }
        Ok(())
    }

    /// Absent from queue *and* history. Start (or continue) the unseen
    /// clock; a previously-processing job shows as Completing while the
    /// history entry lags; past the threshold the job is finalized as
    /// timed out exactly once.
    async fn resolve_unseen(&self, job: &Job, watch: &WatchedJob) {
        let now = Utc::now();
        let unseen_since = {
            let mut watched = self.watched.lock().await;
            match watched.get_mut(&job.id) {
                Some(entry) => *entry.unseen_since.get_or_insert(now),
                None => return,
            }
        };

        let timeout = self.config.timeout_secs_for(&watch.job_type);
        if (now - unseen_since).num_seconds() > timeout {
            let Some(finalized) = self.registry.finalize(job.id, JobStatus::TimedOut, None).await
            else {
                self.unwatch(job.id).await;
                return;
            };
            self.stats.write().await.record_timeout(&finalized.job_type);
            self.unwatch(job.id).await;
            tracing::warn!(
                job_id = finalized.id,
                external_id = %watch.external_id,
                timeout_secs = timeout,
                "Job unseen beyond threshold, finalized as timed out",
            );
            self.emit(JobEvent::TimedOut {
                job_id: finalized.id,
                entity_id: finalized.entity_id,
                job_type: finalized.job_type.clone(),
                update: finalized.progress_update(),
            });
            return;
        }

        // A job that was running and vanished is finishing up; a job
        // never sighted stays Initializing until history or timeout.
        if job.status == JobStatus::Processing {
            self.observe(Observation::status_only(job.id, JobStatus::Completing))
                .await;
        }
    }

    // ---- helpers ----

    /// Apply a non-terminal observation and broadcast on change.
    async fn observe(&self, observation: Observation) {
        if let Some(job) = self.registry.apply_observation(observation).await {
            self.emit(JobEvent::Progress {
                update: job.progress_update(),
            });
        }
    }

    async fn mark_seen(&self, job_id: DbId) {
        if let Some(watch) = self.watched.lock().await.get_mut(&job_id) {
            watch.unseen_since = None;
        }
    }

    async fn unwatch(&self, job_id: DbId) {
        self.watched.lock().await.remove(&job_id);
    }

    fn emit(&self, event: JobEvent) {
        // SendError only means there are zero subscribers right now.
        let _ = self.event_tx.send(event);
    }

    /// The retry ceiling was exceeded: finalize every watched job as
    /// timed out rather than leaving them silently unresolved.
    async fn timeout_all_watched(&self) {
        let entries: Vec<(DbId, WatchedJob)> = {
            let mut watched = self.watched.lock().await;
            watched.drain().collect()
        };
        if entries.is_empty() {
            return;
        }
        tracing::error!(
            count = entries.len(),
            "Render service unreachable beyond retry ceiling; timing out watched jobs",
        );
        for (job_id, watch) in entries {
            let Some(finalized) = self.registry.finalize(job_id, JobStatus::TimedOut, None).await
            else {
                continue;
            };
            self.stats.write().await.record_timeout(&watch.job_type);
            self.emit(JobEvent::TimedOut {
                job_id: finalized.id,
                entity_id: finalized.entity_id,
                job_type: finalized.job_type.clone(),
                update: finalized.progress_update(),
            });
        }
    }
}
