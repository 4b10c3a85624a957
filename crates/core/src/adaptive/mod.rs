//! The adaptive pattern: a RAMP_UP / RAMP_DOWN / SUSTAIN state machine that chooses a
//! target TPS every sampling interval, with recovery from the floor and intermediate
//! stability detection before committing to SUSTAIN.
//!
//! State transitions are a read-compute-swap loop against an `arc_swap::ArcSwap`
//! pointer to an immutable [`AdaptiveState`] snapshot (see `state.rs`): no lock is ever
//! held across the decision, and listener notifications only fire after a swap has
//! actually won the race, so a losing retry never double-reports an event.

pub mod listener;
pub mod state;

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;

use crate::config::AdaptiveConfig;
use crate::decision;
use crate::feedback::{FeedbackProvider, FeedbackSnapshot};
use crate::pattern::LoadPattern;

pub use listener::{AdaptiveEvent, ListenerList, PatternListener};
pub use state::{AdaptiveState, Phase, RecoveryTracking, StabilityTracking};

/// Drives the three-phase adaptive pattern described in the module docs.
pub struct AdaptiveController {
    config: AdaptiveConfig,
    feedback: Arc<dyn FeedbackProvider>,
    state: ArcSwap<AdaptiveState>,
    listeners: ListenerList,
}

impl AdaptiveController {
    pub fn new(config: AdaptiveConfig, feedback: Arc<dyn FeedbackProvider>) -> Self {
        Self {
            config,
            feedback,
            state: ArcSwap::from_pointee(AdaptiveState {
                phase: Phase::RampUp,
                current_tps: 0.0,
                last_adjustment: Duration::ZERO,
                phase_start: Duration::ZERO,
                ramp_down_attempts: 0,
                phase_transition_count: 0,
                stability: StabilityTracking::none(),
                recovery: RecoveryTracking::none(),
                sustain_duration_notified: false,
            }),
            listeners: ListenerList::new(),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn PatternListener>) {
        self.listeners.add(listener);
    }

    pub fn state(&self) -> Arc<AdaptiveState> {
        self.state.load_full()
    }

    /// Runs one decision cycle if `ramp_interval` has elapsed since the last one, or
    /// bootstraps `phase_start`/`last_adjustment` on the very first call. `elapsed` is
    /// the pattern's own clock — the same value handed to `LoadPattern::tps` — so phase
    /// timing is a pure function of it, not of wall-clock `Instant::now`. Feedback is
    /// still sampled against the real clock, since the underlying sink's batching
    /// window is about wall-clock staleness, independent of the pattern's elapsed time.
    /// Retries the compare-and-swap against concurrent callers; notifies listeners only
    /// once, after the swap that actually won.
    fn maybe_run_decision_cycle(&self, elapsed: Duration) {
        loop {
            let current = self.state.load_full();

            if current.current_tps == 0.0 && current.phase_transition_count == 0 {
                // First call: bootstrap at initial_tps, don't run a decision yet.
                let bootstrapped = Arc::new(AdaptiveState {
                    current_tps: self.config.initial_tps,
                    last_adjustment: elapsed,
                    phase_start: elapsed,
                    ..*current
                });
                let prev = self.state.compare_and_swap(&current, bootstrapped);
                if Arc::ptr_eq(&prev, &current) {
                    return;
                }
                continue;
            }

            if elapsed.saturating_sub(current.last_adjustment) < self.config.ramp_interval {
                return;
            }

            let snapshot = self.feedback.get_snapshot(Instant::now());
            let (next, events) = self.decide(&current, &snapshot, elapsed);
            let next = Arc::new(next);
            let prev = self.state.compare_and_swap(&current, Arc::clone(&next));
            if Arc::ptr_eq(&prev, &current) {
                #[cfg(debug_assertions)]
                next.check_invariants(self.config.min_tps, self.config.max_tps, self.config.tps_tolerance);
                for event in events {
                    self.listeners.notify(event);
                }
                return;
            }
            // Lost the race; retry against the winner's state.
        }
    }

    fn decide(
        &self,
        current: &AdaptiveState,
        snapshot: &FeedbackSnapshot,
        now: Duration,
    ) -> (AdaptiveState, Vec<AdaptiveEvent>) {
        match current.phase {
            Phase::RampUp => self.decide_ramp_up(current, snapshot, now),
            Phase::RampDown => self.decide_ramp_down(current, snapshot, now),
            Phase::Sustain => self.decide_sustain(current, snapshot, now),
        }
    }

    fn decide_ramp_up(
        &self,
        current: &AdaptiveState,
        snapshot: &FeedbackSnapshot,
        now: Duration,
    ) -> (AdaptiveState, Vec<AdaptiveEvent>) {
        let cfg = &self.config;
        let mut events = Vec::new();

        if decision::should_ramp_down(snapshot, cfg) {
            let new_tps = (current.current_tps - cfg.ramp_decrement).max(cfg.min_tps);
            let last_known_good = current.recovery.last_known_good_tps.max(current.current_tps);
            let mut next = current.transition_to(Phase::RampDown, now, new_tps);
            next.recovery = RecoveryTracking {
                last_known_good_tps: last_known_good,
                recovery_start: None,
            };
            next.stability = StabilityTracking::none();
            events.push(AdaptiveEvent::PhaseTransition {
                from: Phase::RampUp,
                to: Phase::RampDown,
                tps: new_tps,
            });
            return (next, events);
        }

        let conditions_good = decision::should_ramp_up(snapshot, cfg);
        let new_tps = if conditions_good {
            (current.current_tps + cfg.ramp_increment).min(cfg.max_tps)
        } else {
            current.current_tps
        };

        if conditions_good && new_tps >= cfg.max_tps {
            let mut next = current.transition_to(Phase::Sustain, now, cfg.max_tps);
            next.stability = StabilityTracking {
                candidate_tps: Some(cfg.max_tps),
                candidate_start: Some(now),
                stable_intervals_count: cfg.stable_intervals_required,
            };
            events.push(AdaptiveEvent::PhaseTransition {
                from: Phase::RampUp,
                to: Phase::Sustain,
                tps: cfg.max_tps,
            });
            events.push(AdaptiveEvent::StabilityReached {
                stable_tps: cfg.max_tps,
            });
            return (next, events);
        }

        let (stability, reached) =
            update_stability(current.stability, new_tps, conditions_good, cfg.tps_tolerance, cfg.stable_intervals_required, now);

        if reached {
            let mut next = current.transition_to(Phase::Sustain, now, new_tps);
            next.stability = stability;
            events.push(AdaptiveEvent::PhaseTransition {
                from: Phase::RampUp,
                to: Phase::Sustain,
                tps: new_tps,
            });
            events.push(AdaptiveEvent::StabilityReached { stable_tps: new_tps });
            return (next, events);
        }

        let mut next = current.hold(now, new_tps);
        next.stability = stability;
        if (new_tps - current.current_tps).abs() > f64::EPSILON {
            events.push(AdaptiveEvent::TpsChanged { tps: new_tps });
        }
        (next, events)
    }

    fn decide_ramp_down(
        &self,
        current: &AdaptiveState,
        snapshot: &FeedbackSnapshot,
        now: Duration,
    ) -> (AdaptiveState, Vec<AdaptiveEvent>) {
        let cfg = &self.config;
        let mut events = Vec::new();
        let at_min = current.current_tps <= cfg.min_tps;

        if at_min {
            if decision::can_recover_from_minimum(snapshot, cfg) {
                let recovery_tps = (current.recovery.last_known_good_tps * cfg.recovery_tps_ratio).max(cfg.min_tps);
                let mut next = current.transition_to(Phase::RampUp, now, recovery_tps);
                next.recovery.recovery_start = None;
                next.stability = StabilityTracking::none();
                events.push(AdaptiveEvent::RecoveryCompleted { recovery_tps });
                events.push(AdaptiveEvent::PhaseTransition {
                    from: Phase::RampDown,
                    to: Phase::RampUp,
                    tps: recovery_tps,
                });
                return (next, events);
            }

            let first_entry = current.recovery.recovery_start.is_none();
            let mut next = current.hold(now, cfg.min_tps);
            next.recovery.recovery_start = Some(current.recovery.recovery_start.unwrap_or(now));
            next.stability = StabilityTracking::none();
            next.ramp_down_attempts += 1;
            if first_entry {
                events.push(AdaptiveEvent::RecoveryStarted {
                    last_known_good_tps: current.recovery.last_known_good_tps,
                });
            }
            return (next, events);
        }

        if decision::should_ramp_down(snapshot, cfg) {
            let new_tps = (current.current_tps - cfg.ramp_decrement).max(cfg.min_tps);
            let mut next = current.hold(now, new_tps);
            next.stability = StabilityTracking::none();
            next.ramp_down_attempts += 1;
            events.push(AdaptiveEvent::TpsChanged { tps: new_tps });
            return (next, events);
        }

        // Errors cleared, above the floor: look for stability before promoting to
        // SUSTAIN. Unlike RAMP_UP, this branch is reached precisely because the signal
        // is good enough to stop ramping down, so conditions are treated as "good" here
        // unconditionally rather than re-deriving should_ramp_up.
        let (stability, reached) = update_stability(
            current.stability,
            current.current_tps,
            true,
            cfg.tps_tolerance,
            cfg.stable_intervals_required,
            now,
        );

        if reached {
            let mut next = current.transition_to(Phase::Sustain, now, current.current_tps);
            next.stability = stability;
            events.push(AdaptiveEvent::PhaseTransition {
                from: Phase::RampDown,
                to: Phase::Sustain,
                tps: current.current_tps,
            });
            events.push(AdaptiveEvent::StabilityReached {
                stable_tps: current.current_tps,
            });
            return (next, events);
        }

        let mut next = current.hold(now, current.current_tps);
        next.stability = stability;
        (next, events)
    }

    fn decide_sustain(
        &self,
        current: &AdaptiveState,
        snapshot: &FeedbackSnapshot,
        now: Duration,
    ) -> (AdaptiveState, Vec<AdaptiveEvent>) {
        let cfg = &self.config;
        let mut events = Vec::new();

        if decision::should_ramp_down(snapshot, cfg) {
            let new_tps = (current.current_tps - cfg.ramp_decrement).max(cfg.min_tps);
            let last_known_good = current.recovery.last_known_good_tps.max(current.current_tps);
            let mut next = current.transition_to(Phase::RampDown, now, new_tps);
            next.recovery = RecoveryTracking {
                last_known_good_tps: last_known_good,
                recovery_start: None,
            };
            next.stability = StabilityTracking::none();
            events.push(AdaptiveEvent::PhaseTransition {
                from: Phase::Sustain,
                to: Phase::RampDown,
                tps: new_tps,
            });
            return (next, events);
        }

        if decision::should_ramp_up(snapshot, cfg) && current.current_tps < cfg.max_tps {
            // Headroom-seeking: go looking for more room without losing current_tps.
            let next = current.transition_to(Phase::RampUp, now, current.current_tps);
            events.push(AdaptiveEvent::PhaseTransition {
                from: Phase::Sustain,
                to: Phase::RampUp,
                tps: current.current_tps,
            });
            return (next, events);
        }

        let time_in_phase = now.saturating_sub(current.phase_start);
        if !current.sustain_duration_notified && time_in_phase >= cfg.sustain_duration {
            let mut next = current.hold(now, current.current_tps);
            next.sustain_duration_notified = true;
            events.push(AdaptiveEvent::SustainDurationElapsed {
                stable_tps: current.current_tps,
                elapsed_in_phase: time_in_phase,
            });
            return (next, events);
        }

        (current.hold(now, current.current_tps), events)
    }
}

fn update_stability(
    tracking: StabilityTracking,
    current_tps: f64,
    conditions_good: bool,
    tolerance: f64,
    required: u32,
    now: Duration,
) -> (StabilityTracking, bool) {
    if !conditions_good {
        return (StabilityTracking::none(), false);
    }
    let next = match tracking.candidate_tps {
        Some(candidate) if (current_tps - candidate).abs() <= tolerance => StabilityTracking {
            candidate_tps: tracking.candidate_tps,
            candidate_start: tracking.candidate_start,
            stable_intervals_count: tracking.stable_intervals_count + 1,
        },
        _ => StabilityTracking {
            candidate_tps: Some(current_tps),
            candidate_start: Some(now),
            stable_intervals_count: 1,
        },
    };
    let reached = next.stable_intervals_count >= required;
    (next, reached)
}

impl LoadPattern for AdaptiveController {
    fn tps(&self, elapsed: Duration) -> f64 {
        self.maybe_run_decision_cycle(elapsed);
        self.state.load().current_tps
    }

    fn duration(&self) -> Duration {
        Duration::MAX
    }

    fn should_record_metrics(&self, _elapsed: Duration) -> bool {
        true
    }
}
