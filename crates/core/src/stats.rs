//! Rolling job statistics: completion durations, failure patterns, and
//! per-step timing used for completion estimates.
//!
//! All updates are append-only. Completion samples are kept in a
//! bounded window per job type so aggregates track recent engine
//! behaviour rather than all-time history.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum completion samples retained per job type.
pub const COMPLETION_WINDOW: usize = 256;

/// Maximum length of a normalized error signature.
const MAX_SIGNATURE_LEN: usize = 120;

// ---------------------------------------------------------------------------
// Error signatures
// ---------------------------------------------------------------------------

/// Normalize an engine error message into a stable pattern key.
///
/// Takes the first line, lowercased and truncated, so that repeated
/// failures with variable suffixes (paths, seeds) still group together.
pub fn error_signature(message: &str) -> String {
    let first_line = message.lines().next().unwrap_or("").trim().to_lowercase();
    if first_line.is_empty() {
        return "unknown".to_string();
    }
    first_line.chars().take(MAX_SIGNATURE_LEN).collect()
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

/// Aggregate view of completion durations for one job type.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionStats {
    pub count: usize,
    pub mean_secs: f64,
    pub median_secs: f64,
    pub min_secs: f64,
    pub max_secs: f64,
}

/// Serializable snapshot of the whole store, used by queue statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub completions: HashMap<String, CompletionStats>,
    /// Failure counts keyed `"{job_type}:{signature}"`.
    pub failures: HashMap<String, u64>,
    pub timeouts: HashMap<String, u64>,
}

#[derive(Debug, Default)]
struct TypeStats {
    /// Bounded window of recent completion durations (seconds).
    durations: VecDeque<f64>,
    /// All-time completion count (not limited by the window).
    total_count: usize,
    /// Incremental all-time mean.
    mean_secs: f64,
    /// Rolling average seconds per generation step.
    step_avg_secs: f64,
    step_samples: u32,
}

// ---------------------------------------------------------------------------
// JobStatisticsStore
// ---------------------------------------------------------------------------

/// Rolling aggregates of completion times and failure patterns.
///
/// Plain synchronous state; callers wrap it in a lock when shared.
#[derive(Debug, Default)]
pub struct JobStatisticsStore {
    by_type: HashMap<String, TypeStats>,
    failures: HashMap<(String, String), u64>,
    timeouts: HashMap<String, u64>,
}

impl JobStatisticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful completion duration for a job type.
    pub fn record_completion(&mut self, job_type: &str, duration_secs: f64) {
        if !duration_secs.is_finite() || duration_secs < 0.0 {
            return;
        }
        let entry = self.by_type.entry(job_type.to_string()).or_default();
        entry.total_count += 1;
        entry.mean_secs = incremental_mean(entry.mean_secs, duration_secs, entry.total_count);
        if entry.durations.len() == COMPLETION_WINDOW {
            entry.durations.pop_front();
        }
        entry.durations.push_back(duration_secs);
    }

    /// Record an observed per-step duration while a job is processing.
    pub fn record_step_duration(&mut self, job_type: &str, secs_per_step: f64) {
        if !secs_per_step.is_finite() || secs_per_step <= 0.0 {
            return;
        }
        let entry = self.by_type.entry(job_type.to_string()).or_default();
        entry.step_samples += 1;
        entry.step_avg_secs =
            incremental_mean(entry.step_avg_secs, secs_per_step, entry.step_samples as usize);
    }

    /// Record an engine-reported failure under its normalized signature.
    pub fn record_failure(&mut self, job_type: &str, signature: &str) {
        *self
            .failures
            .entry((job_type.to_string(), signature.to_string()))
            .or_insert(0) += 1;
    }

    /// Record a timeout. Kept apart from explicit failures.
    pub fn record_timeout(&mut self, job_type: &str) {
        *self.timeouts.entry(job_type.to_string()).or_insert(0) += 1;
    }

    /// Aggregate completion stats for one job type, if any samples exist.
    pub fn completion_stats(&self, job_type: &str) -> Option<CompletionStats> {
        let entry = self.by_type.get(job_type)?;
        if entry.durations.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = entry.durations.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("durations are finite"));
        let median = if sorted.len() % 2 == 1 {
            sorted[sorted.len() / 2]
        } else {
            let hi = sorted.len() / 2;
            (sorted[hi - 1] + sorted[hi]) / 2.0
        };
        Some(CompletionStats {
            count: entry.total_count,
            mean_secs: entry.mean_secs,
            median_secs: median,
            min_secs: sorted[0],
            max_secs: sorted[sorted.len() - 1],
        })
    }

    /// Median completion time for a job type, if known.
    pub fn median_completion_secs(&self, job_type: &str) -> Option<f64> {
        self.completion_stats(job_type).map(|s| s.median_secs)
    }

    /// Rolling average per-step duration, if any samples exist.
    pub fn avg_step_secs(&self, job_type: &str) -> Option<f64> {
        let entry = self.by_type.get(job_type)?;
        (entry.step_samples > 0).then_some(entry.step_avg_secs)
    }

    /// Estimate the remaining seconds for an in-flight job.
    ///
    /// Uses `remaining_steps × per-step average` when step counts are
    /// known, otherwise `median × (1 − progress/100)`. Returns `None`
    /// when neither source has data — no synthetic guesses.
    pub fn estimate_remaining_secs(
        &self,
        job_type: &str,
        progress_percent: i16,
        remaining_steps: Option<i32>,
    ) -> Option<f64> {
        if let (Some(steps), Some(avg)) = (remaining_steps, self.avg_step_secs(job_type)) {
            if steps >= 0 {
                return Some(steps as f64 * avg);
            }
        }
        let median = self.median_completion_secs(job_type)?;
        let fraction_left = 1.0 - f64::from(progress_percent.clamp(0, 100)) / 100.0;
        Some(median * fraction_left)
    }

    /// Snapshot all aggregates for external reporting.
    pub fn snapshot(&self) -> StatsSnapshot {
        let completions = self
            .by_type
            .keys()
            .filter_map(|ty| self.completion_stats(ty).map(|s| (ty.clone(), s)))
            .collect();
        let failures = self
            .failures
            .iter()
            .map(|((ty, sig), count)| (format!("{ty}:{sig}"), *count))
            .collect();
        StatsSnapshot {
            completions,
            failures,
            timeouts: self.timeouts.clone(),
        }
    }
}

/// Compute the incremental (online) mean after observing a new value.
///
/// Formula: `new_avg = old_avg + (new_value - old_avg) / new_count`
pub fn incremental_mean(old_avg: f64, new_value: f64, new_count: usize) -> f64 {
    old_avg + (new_value - old_avg) / new_count as f64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- error_signature ------------------------------------------------------

    #[test]
    fn signature_takes_first_line_lowercased() {
        let sig = error_signature("CUDA out of memory\n  at node 42");
        assert_eq!(sig, "cuda out of memory");
    }

    #[test]
    fn signature_truncates_long_messages() {
        let long = "x".repeat(500);
        assert_eq!(error_signature(&long).len(), MAX_SIGNATURE_LEN);
    }

    #[test]
    fn empty_message_maps_to_unknown() {
        assert_eq!(error_signature("   \n"), "unknown");
    }

    // -- completions ----------------------------------------------------------

    #[test]
    fn completion_stats_empty_type_is_none() {
        let store = JobStatisticsStore::new();
        assert!(store.completion_stats("portrait").is_none());
    }

    #[test]
    fn completion_aggregates() {
        let mut store = JobStatisticsStore::new();
        for secs in [10.0, 20.0, 30.0] {
            store.record_completion("portrait", secs);
        }
        let stats = store.completion_stats("portrait").unwrap();
        assert_eq!(stats.count, 3);
        assert!((stats.mean_secs - 20.0).abs() < 1e-9);
        assert!((stats.median_secs - 20.0).abs() < 1e-9);
        assert!((stats.min_secs - 10.0).abs() < 1e-9);
        assert!((stats.max_secs - 30.0).abs() < 1e-9);
    }

    #[test]
    fn median_even_sample_count_averages_middle_pair() {
        let mut store = JobStatisticsStore::new();
        for secs in [10.0, 20.0, 30.0, 40.0] {
            store.record_completion("portrait", secs);
        }
        let stats = store.completion_stats("portrait").unwrap();
        assert!((stats.median_secs - 25.0).abs() < 1e-9);
    }

    #[test]
    fn negative_and_nan_durations_ignored() {
        let mut store = JobStatisticsStore::new();
        store.record_completion("portrait", -1.0);
        store.record_completion("portrait", f64::NAN);
        assert!(store.completion_stats("portrait").is_none());
    }

    #[test]
    fn window_is_bounded() {
        let mut store = JobStatisticsStore::new();
        for i in 0..(COMPLETION_WINDOW + 50) {
            store.record_completion("portrait", i as f64);
        }
        let stats = store.completion_stats("portrait").unwrap();
        // Total count keeps growing, window min reflects eviction.
        assert_eq!(stats.count, COMPLETION_WINDOW + 50);
        assert!((stats.min_secs - 50.0).abs() < 1e-9);
    }

    // -- failures & timeouts --------------------------------------------------

    #[test]
    fn failures_counted_per_type_and_signature() {
        let mut store = JobStatisticsStore::new();
        store.record_failure("portrait", "cuda out of memory");
        store.record_failure("portrait", "cuda out of memory");
        store.record_failure("portrait", "bad workflow");
        let snap = store.snapshot();
        assert_eq!(snap.failures["portrait:cuda out of memory"], 2);
        assert_eq!(snap.failures["portrait:bad workflow"], 1);
    }

    #[test]
    fn timeouts_tracked_separately_from_failures() {
        let mut store = JobStatisticsStore::new();
        store.record_timeout("portrait");
        store.record_failure("portrait", "boom");
        let snap = store.snapshot();
        assert_eq!(snap.timeouts["portrait"], 1);
        assert_eq!(snap.failures.len(), 1);
    }

    // -- estimation -----------------------------------------------------------

    #[test]
    fn estimate_prefers_step_timing() {
        let mut store = JobStatisticsStore::new();
        store.record_step_duration("portrait", 2.0);
        store.record_completion("portrait", 1000.0);
        let est = store
            .estimate_remaining_secs("portrait", 50, Some(10))
            .unwrap();
        assert!((est - 20.0).abs() < 1e-9);
    }

    #[test]
    fn estimate_falls_back_to_median_fraction() {
        let mut store = JobStatisticsStore::new();
        store.record_completion("portrait", 100.0);
        let est = store.estimate_remaining_secs("portrait", 25, None).unwrap();
        assert!((est - 75.0).abs() < 1e-9);
    }

    #[test]
    fn estimate_none_without_data() {
        let store = JobStatisticsStore::new();
        assert!(store.estimate_remaining_secs("portrait", 50, None).is_none());
    }

    // -- incremental_mean -----------------------------------------------------

    #[test]
    fn incremental_mean_matches_batch_mean() {
        let mut avg = 0.0;
        for (i, v) in [10.0, 20.0, 30.0].iter().enumerate() {
            avg = incremental_mean(avg, *v, i + 1);
        }
        assert!((avg - 20.0).abs() < f64::EPSILON);
    }
}
