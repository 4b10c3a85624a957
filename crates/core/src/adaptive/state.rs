//! The adaptive controller's state record and its atomic-swap storage.
//!
//! `AdaptiveState` is immutable once constructed and replaced wholesale via
//! `arc_swap::ArcSwap`, which gives readers lock-free, wait-free access and gives
//! writers a linearisable compare-and-swap retry loop (`rcu`) — no critical section ever
//! appears on the hot read path.

use std::time::Duration;

/// The three reachable phases of the adaptive pattern. Earlier revisions carried a
/// `COMPLETE` phase and, later, a separate `RECOVERY` phase; both are folded away here —
/// recovery is represented as a sub-state of `RampDown` (see [`RecoveryTracking`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    RampUp,
    RampDown,
    Sustain,
}

/// Tracks whether `current_tps` has held steady for long enough, under good conditions,
/// to justify promoting to `Sustain`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilityTracking {
    pub candidate_tps: Option<f64>,
    pub candidate_start: Option<Duration>,
    pub stable_intervals_count: u32,
}

impl StabilityTracking {
    pub fn none() -> Self {
        Self {
            candidate_tps: None,
            candidate_start: None,
            stable_intervals_count: 0,
        }
    }
}

/// Tracks the climb back up after bottoming out at `min_tps` in `RampDown`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecoveryTracking {
    pub last_known_good_tps: f64,
    pub recovery_start: Option<Duration>,
}

impl RecoveryTracking {
    pub fn none() -> Self {
        Self {
            last_known_good_tps: 0.0,
            recovery_start: None,
        }
    }
}

/// One immutable snapshot of the adaptive controller. Fully constructed before every
/// publish; never partially updated in place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveState {
    pub phase: Phase,
    pub current_tps: f64,
    pub last_adjustment: Duration,
    pub phase_start: Duration,
    pub ramp_down_attempts: u32,
    pub phase_transition_count: u64,
    pub stability: StabilityTracking,
    pub recovery: RecoveryTracking,
    /// Whether the `sustain_duration`-elapsed notification has already fired for the
    /// current stay in `Sustain`. Reset to `false` on every transition into `Sustain`.
    pub sustain_duration_notified: bool,
}

impl AdaptiveState {
    pub fn initial(now: Duration, initial_tps: f64) -> Self {
        Self {
            phase: Phase::RampUp,
            current_tps: initial_tps,
            last_adjustment: now,
            phase_start: now,
            ramp_down_attempts: 0,
            phase_transition_count: 0,
            stability: StabilityTracking::none(),
            recovery: RecoveryTracking::none(),
            sustain_duration_notified: false,
        }
    }

    /// Returns a copy with `phase` changed and the phase-transition bookkeeping updated.
    /// Same-phase updates must use `with_tps`/`with_stability` instead, which leave
    /// `phase_start` and `phase_transition_count` untouched.
    pub fn transition_to(&self, phase: Phase, now: Duration, current_tps: f64) -> Self {
        Self {
            phase,
            current_tps,
            last_adjustment: now,
            phase_start: now,
            phase_transition_count: self.phase_transition_count + 1,
            sustain_duration_notified: false,
            ..*self
        }
    }

    pub fn hold(&self, now: Duration, current_tps: f64) -> Self {
        Self {
            current_tps,
            last_adjustment: now,
            ..*self
        }
    }

    #[cfg(debug_assertions)]
    pub fn check_invariants(&self, min_tps: f64, max_tps: f64, tps_tolerance: f64) {
        debug_assert!(
            self.current_tps == 0.0 || (min_tps..=max_tps).contains(&self.current_tps),
            "current_tps {} outside [{}, {}]",
            self.current_tps,
            min_tps,
            max_tps
        );
        debug_assert!(self.phase_start <= self.last_adjustment);
        if self.phase == Phase::Sustain {
            let stable_tps = self
                .stability
                .candidate_tps
                .expect("Sustain state must carry a stable candidate_tps");
            debug_assert!((stable_tps - self.current_tps).abs() <= tps_tolerance.max(1e-9));
        }
    }

    #[cfg(not(debug_assertions))]
    pub fn check_invariants(&self, _min_tps: f64, _max_tps: f64, _tps_tolerance: f64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_increments_phase_transition_count_and_resets_phase_start() {
        let t0 = Duration::from_secs(0);
        let s0 = AdaptiveState::initial(t0, 10.0);
        let t1 = t0 + Duration::from_secs(1);
        let s1 = s0.transition_to(Phase::RampDown, t1, 5.0);
        assert_eq!(s1.phase_transition_count, 1);
        assert_eq!(s1.phase_start, t1);
        assert_eq!(s1.phase, Phase::RampDown);
    }

    #[test]
    fn hold_does_not_change_phase_start_or_transition_count() {
        let t0 = Duration::from_secs(0);
        let s0 = AdaptiveState::initial(t0, 10.0);
        let t1 = t0 + Duration::from_secs(1);
        let s1 = s0.hold(t1, 15.0);
        assert_eq!(s1.phase_start, t0);
        assert_eq!(s1.phase_transition_count, 0);
        assert_eq!(s1.current_tps, 15.0);
    }
}
