//! Pure, side-effect-free decision predicates over a [`FeedbackSnapshot`].
//!
//! Small, heavily unit-tested functions, on purpose: every transition in the adaptive
//! state machine ultimately bottoms out in one of these.

use crate::config::AdaptiveConfig;
use crate::feedback::FeedbackSnapshot;

pub fn should_ramp_down(snapshot: &FeedbackSnapshot, config: &AdaptiveConfig) -> bool {
    snapshot.failure_rate >= config.error_threshold
        || snapshot.backpressure >= config.bp_ramp_down_threshold
}

pub fn should_ramp_up(snapshot: &FeedbackSnapshot, config: &AdaptiveConfig) -> bool {
    snapshot.failure_rate < config.error_threshold && snapshot.backpressure < config.bp_ramp_up_threshold
}

/// `should_sustain` additionally requires the stability tracker to have already
/// accumulated enough consecutive good intervals.
pub fn should_sustain(snapshot: &FeedbackSnapshot, config: &AdaptiveConfig, stable_intervals_count: u32) -> bool {
    should_ramp_up(snapshot, config) && stable_intervals_count >= config.stable_intervals_required
}

/// Recovery prefers the recent-window failure rate over the overall rate, since it is
/// evaluating "is it safe to leave the floor right now", not "was it safe historically".
pub fn can_recover_from_minimum(snapshot: &FeedbackSnapshot, config: &AdaptiveConfig) -> bool {
    let recovery_snapshot = FeedbackSnapshot {
        failure_rate: snapshot.recent_failure_rate,
        ..*snapshot
    };
    should_ramp_up(&recovery_snapshot, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AdaptiveConfig {
        AdaptiveConfig {
            error_threshold: 0.1,
            bp_ramp_up_threshold: 0.3,
            bp_ramp_down_threshold: 0.7,
            stable_intervals_required: 3,
            ..AdaptiveConfig::default()
        }
    }

    fn snapshot(failure_rate: f64, backpressure: f64) -> FeedbackSnapshot {
        FeedbackSnapshot {
            failure_rate,
            recent_failure_rate: failure_rate,
            backpressure,
            total_executions: 100,
        }
    }

    #[test]
    fn ramp_down_on_high_failure_rate() {
        assert!(should_ramp_down(&snapshot(0.2, 0.0), &config()));
    }

    #[test]
    fn ramp_down_on_high_backpressure() {
        assert!(should_ramp_down(&snapshot(0.0, 0.8), &config()));
    }

    #[test]
    fn ramp_up_requires_both_thresholds_clear() {
        assert!(should_ramp_up(&snapshot(0.0, 0.1), &config()));
        assert!(!should_ramp_up(&snapshot(0.2, 0.1), &config()));
        assert!(!should_ramp_up(&snapshot(0.0, 0.5), &config()));
    }

    #[test]
    fn hold_band_between_thresholds() {
        let s = snapshot(0.0, 0.5);
        assert!(!should_ramp_down(&s, &config()));
        assert!(!should_ramp_up(&s, &config()));
    }

    #[test]
    fn sustain_requires_enough_stable_intervals() {
        let s = snapshot(0.0, 0.0);
        assert!(!should_sustain(&s, &config(), 2));
        assert!(should_sustain(&s, &config(), 3));
    }

    #[test]
    fn recovery_uses_recent_window_not_overall() {
        let mut s = snapshot(0.5, 0.0);
        s.recent_failure_rate = 0.0;
        assert!(can_recover_from_minimum(&s, &config()));
    }
}
