//! Orchestration engine: progress monitoring, job registry, and the
//! replenishment scheduler.
//!
//! The monitor turns the render service's polled queue/history
//! snapshots into a monotonic per-job progress feed; the registry owns
//! the authoritative job records; the scheduler turns approval signals
//! into throttled batch submissions. Components communicate through a
//! single broadcast channel of [`events::JobEvent`]s.

pub mod events;
pub mod monitor;
pub mod registry;
pub mod render;
pub mod scheduler;

pub use events::JobEvent;
pub use monitor::{MonitorConfig, ProgressMonitor, QueueCounts};
pub use registry::{InMemoryJobStore, JobRegistry};
pub use render::RenderEngine;
pub use scheduler::{ReplenishmentScheduler, SubmitError, Submission};
