//! Replenishment state and guard evaluation.
//!
//! Pure logic for the approval-driven feedback controller: given an
//! entity's counters and the configured throttles, decide whether a new
//! generation batch may be submitted. The guard order is fixed and
//! short-circuits on the first failure; ties always resolve to
//! "do not submit". Orchestration (locking, submission, event wiring)
//! lives in the engine crate.

use chrono::NaiveDate;
use serde::Serialize;

use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunable throttles for the replenishment controller.
#[derive(Debug, Clone)]
pub struct ReplenishmentConfig {
    /// Approved-output quota each entity is kept stocked to.
    pub target: u32,
    /// Jobs submitted per replenishment cycle.
    pub batch_size: u32,
    /// Minimum seconds between submissions for one entity.
    pub cooldown_secs: i64,
    /// Maximum jobs submitted per entity per UTC day.
    pub max_daily: u32,
    /// Rejection streak at which an entity is paused until manual reset.
    pub max_consecutive_rejects: u32,
    /// Maximum entities with an in-flight batch at once.
    pub max_concurrent: usize,
}

impl Default for ReplenishmentConfig {
    fn default() -> Self {
        Self {
            target: 10,
            batch_size: 4,
            cooldown_secs: 300,
            max_daily: 24,
            max_consecutive_rejects: 5,
            max_concurrent: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Events & state
// ---------------------------------------------------------------------------

/// An approval or rejection signal for one generated output.
#[derive(Debug, Clone)]
pub struct ApprovalEvent {
    pub entity_id: DbId,
    pub approved: bool,
    pub timestamp: Timestamp,
}

/// Per-entity replenishment counters.
///
/// Mutated only under an entity-scoped lock held by the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct ReplenishmentState {
    pub approved_count: u32,
    /// Jobs submitted but not yet resolved (approved, rejected, failed).
    pub pending_count: u32,
    pub daily_count: u32,
    /// UTC date the daily counter belongs to.
    pub daily_window: NaiveDate,
    pub consecutive_rejects: u32,
    /// True while a batch submitted for this entity is in flight.
    pub active_generation: bool,
    pub last_generation_at: Option<Timestamp>,
}

impl ReplenishmentState {
    pub fn new(now: Timestamp) -> Self {
        Self {
            approved_count: 0,
            pending_count: 0,
            daily_count: 0,
            daily_window: now.date_naive(),
            consecutive_rejects: 0,
            active_generation: false,
            last_generation_at: None,
        }
    }

    /// Reset the daily counter when `now` crosses a UTC day boundary.
    /// Idempotent within a day.
    pub fn roll_daily_window(&mut self, now: Timestamp) {
        let today = now.date_naive();
        if today != self.daily_window {
            self.daily_count = 0;
            self.daily_window = today;
        }
    }

    /// Apply an approval/rejection outcome to the reject streak.
    ///
    /// Any approval clears the streak immediately; a rejection extends it.
    pub fn record_outcome(&mut self, approved: bool) {
        if approved {
            self.approved_count += 1;
            self.consecutive_rejects = 0;
        } else {
            self.consecutive_rejects += 1;
        }
        self.pending_count = self.pending_count.saturating_sub(1);
    }

    /// Record a submitted batch: flips the active flag, stamps the
    /// cooldown clock, bumps the daily and pending counters.
    pub fn record_submission(&mut self, batch_size: u32, now: Timestamp) {
        self.active_generation = true;
        self.last_generation_at = Some(now);
        self.daily_count += batch_size;
        self.pending_count += batch_size;
    }
}

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

/// Why a replenishment cycle was skipped.
///
/// Expected steady-state behaviour, not an error: logged at debug and
/// never surfaced to external consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The entity already meets its quota.
    NoDeficit,
    /// A batch for this entity is still in flight.
    GenerationActive,
    /// The per-entity cooldown has not elapsed.
    CoolingDown,
    /// The entity hit its daily submission cap.
    DailyCapReached,
    /// The rejection streak paused this entity; needs a manual reset.
    EntityPaused,
    /// Too many entities have batches in flight.
    ConcurrencyCapReached,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoDeficit => "no_deficit",
            Self::GenerationActive => "generation_active",
            Self::CoolingDown => "cooling_down",
            Self::DailyCapReached => "daily_cap_reached",
            Self::EntityPaused => "entity_paused",
            Self::ConcurrencyCapReached => "concurrency_cap_reached",
        }
    }
}

/// Evaluate the submission guards in their fixed order.
///
/// Order: deficit, active flag, cooldown, daily cap, reject pause,
/// global concurrency. Short-circuits on the first failing guard.
/// `global_active` is the number of entities with a batch in flight,
/// counted *excluding* this entity (its own flag is guard two).
pub fn evaluate_guards(
    state: &ReplenishmentState,
    config: &ReplenishmentConfig,
    now: Timestamp,
    global_active: usize,
) -> Result<(), SkipReason> {
    let deficit = i64::from(config.target) - i64::from(state.approved_count);
    if deficit <= 0 {
        return Err(SkipReason::NoDeficit);
    }

    if state.active_generation {
        return Err(SkipReason::GenerationActive);
    }

    if let Some(last) = state.last_generation_at {
        let elapsed = (now - last).num_seconds();
        if elapsed < config.cooldown_secs {
            return Err(SkipReason::CoolingDown);
        }
    }

    if state.daily_count >= config.max_daily {
        return Err(SkipReason::DailyCapReached);
    }

    if state.consecutive_rejects >= config.max_consecutive_rejects {
        return Err(SkipReason::EntityPaused);
    }

    if global_active >= config.max_concurrent {
        return Err(SkipReason::ConcurrencyCapReached);
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn now() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 8, 27, 12, 0, 0).unwrap()
    }

    fn config() -> ReplenishmentConfig {
        ReplenishmentConfig {
            target: 10,
            batch_size: 3,
            cooldown_secs: 60,
            max_daily: 12,
            max_consecutive_rejects: 5,
            max_concurrent: 3,
        }
    }

    fn eligible_state() -> ReplenishmentState {
        let mut state = ReplenishmentState::new(now());
        state.approved_count = 7; // deficit = 3
        state
    }

    // -- guard ordering -------------------------------------------------------

    #[test]
    fn all_guards_pass() {
        assert!(evaluate_guards(&eligible_state(), &config(), now(), 0).is_ok());
    }

    #[test]
    fn no_deficit_short_circuits_first() {
        let mut state = eligible_state();
        state.approved_count = 10;
        // Everything else is also failing; NoDeficit must win.
        state.active_generation = true;
        state.consecutive_rejects = 99;
        let err = evaluate_guards(&state, &config(), now(), 99).unwrap_err();
        assert_eq!(err, SkipReason::NoDeficit);
    }

    #[test]
    fn target_exactly_met_is_no_deficit() {
        let mut state = eligible_state();
        state.approved_count = config().target;
        assert_eq!(
            evaluate_guards(&state, &config(), now(), 0),
            Err(SkipReason::NoDeficit)
        );
    }

    #[test]
    fn active_generation_checked_before_cooldown() {
        let mut state = eligible_state();
        state.active_generation = true;
        state.last_generation_at = Some(now()); // cooldown also failing
        let err = evaluate_guards(&state, &config(), now(), 0).unwrap_err();
        assert_eq!(err, SkipReason::GenerationActive);
    }

    #[test]
    fn cooldown_not_elapsed() {
        let mut state = eligible_state();
        state.last_generation_at = Some(now() - Duration::seconds(30));
        assert_eq!(
            evaluate_guards(&state, &config(), now(), 0),
            Err(SkipReason::CoolingDown)
        );
    }

    #[test]
    fn cooldown_boundary_allows_submission() {
        let mut state = eligible_state();
        state.last_generation_at = Some(now() - Duration::seconds(60));
        assert!(evaluate_guards(&state, &config(), now(), 0).is_ok());
    }

    #[test]
    fn daily_cap_boundary_blocks() {
        let mut state = eligible_state();
        state.daily_count = config().max_daily;
        assert_eq!(
            evaluate_guards(&state, &config(), now(), 0),
            Err(SkipReason::DailyCapReached)
        );
    }

    #[test]
    fn reject_streak_at_limit_pauses_entity() {
        let mut state = eligible_state();
        state.consecutive_rejects = config().max_consecutive_rejects;
        assert_eq!(
            evaluate_guards(&state, &config(), now(), 0),
            Err(SkipReason::EntityPaused)
        );
    }

    #[test]
    fn concurrency_cap_is_the_last_guard() {
        let state = eligible_state();
        assert_eq!(
            evaluate_guards(&state, &config(), now(), config().max_concurrent),
            Err(SkipReason::ConcurrencyCapReached)
        );
    }

    #[test]
    fn concurrency_below_cap_passes() {
        let state = eligible_state();
        assert!(evaluate_guards(&state, &config(), now(), config().max_concurrent - 1).is_ok());
    }

    // -- daily window ---------------------------------------------------------

    #[test]
    fn daily_window_resets_at_day_boundary() {
        let mut state = eligible_state();
        state.daily_count = 12;
        state.roll_daily_window(now() + Duration::days(1));
        assert_eq!(state.daily_count, 0);
    }

    #[test]
    fn daily_window_idempotent_within_a_day() {
        let mut state = eligible_state();
        state.daily_count = 5;
        state.roll_daily_window(now());
        state.roll_daily_window(now() + Duration::hours(3));
        assert_eq!(state.daily_count, 5);
    }

    // -- outcome recording ----------------------------------------------------

    #[test]
    fn approval_resets_reject_streak_immediately() {
        let mut state = eligible_state();
        state.consecutive_rejects = 4;
        state.record_outcome(true);
        assert_eq!(state.consecutive_rejects, 0);
        assert_eq!(state.approved_count, 8);
    }

    #[test]
    fn rejections_accumulate() {
        let mut state = eligible_state();
        for _ in 0..3 {
            state.record_outcome(false);
        }
        assert_eq!(state.consecutive_rejects, 3);
        assert_eq!(state.approved_count, 7);
    }

    #[test]
    fn pending_count_never_underflows() {
        let mut state = eligible_state();
        state.pending_count = 0;
        state.record_outcome(false);
        assert_eq!(state.pending_count, 0);
    }

    #[test]
    fn record_submission_updates_all_counters() {
        let mut state = eligible_state();
        state.record_submission(3, now());
        assert!(state.active_generation);
        assert_eq!(state.daily_count, 3);
        assert_eq!(state.pending_count, 3);
        assert_eq!(state.last_generation_at, Some(now()));
    }
}
