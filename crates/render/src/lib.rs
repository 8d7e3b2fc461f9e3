//! HTTP client for the render service.
//!
//! The render service exposes no push-based completion notice — only a
//! queue snapshot and a history snapshot, polled on demand. This crate
//! wraps that narrow surface: workflow submission, queue introspection,
//! and history lookup, plus the backoff policy used when polling fails.

pub mod backoff;
pub mod client;
pub mod snapshot;

pub use backoff::RetryConfig;
pub use client::{RenderClient, RenderClientError, SubmitResponse};
pub use snapshot::{HistoryOutcome, PendingJob, QueueSnapshot, RunningJob};
