//! External contracts the execution engine consumes but does not implement itself,
//! beyond the one implementor it ships: [`crate::adaptive::AdaptiveController`].

use std::time::Duration;

/// A target-TPS function of elapsed time, plus the bounds the engine uses to drive it.
///
/// `tps` is a pure function of `elapsed` except insofar as the pattern's own internal
/// state (e.g. the adaptive controller's phase) evolves as a result of its own decision
/// cycles — it must never depend on wall-clock time other than the `elapsed` argument.
pub trait LoadPattern: Send + Sync {
    /// Target dispatches per second at `elapsed` since the pattern started. `0` signals
    /// "pause now", not "test over".
    fn tps(&self, elapsed: Duration) -> f64;

    /// Upper bound on test duration; the engine stops the dispatch loop once reached.
    fn duration(&self) -> Duration;

    /// Whether an execution at `elapsed` should be recorded into metrics. Defaults to
    /// `true`; wrappers like warmup/cooldown return `false` outside steady-state.
    fn should_record_metrics(&self, _elapsed: Duration) -> bool {
        true
    }
}

/// Feedback the pattern reads back from what has already been dispatched.
pub trait MetricsProvider: Send + Sync {
    fn failure_rate(&self) -> f64;
    fn recent_failure_rate(&self, window: Duration) -> f64;
    fn total_executions(&self) -> u64;
    fn failure_count(&self) -> u64 {
        0
    }
}

/// An externally sourced saturation signal, independent of error rate. Absence implies
/// a constant `0.0`.
pub trait BackpressureProvider: Send + Sync {
    fn level(&self) -> f64;
}

/// Lets a caller keep its own `Arc` handle to a pattern (to read its state after the
/// engine has taken ownership of a clone) while still satisfying `ExecutionEngine`'s
/// by-value `LoadPattern` bound.
impl<T: LoadPattern + ?Sized> LoadPattern for std::sync::Arc<T> {
    fn tps(&self, elapsed: Duration) -> f64 {
        (**self).tps(elapsed)
    }

    fn duration(&self) -> Duration {
        (**self).duration()
    }

    fn should_record_metrics(&self, elapsed: Duration) -> bool {
        (**self).should_record_metrics(elapsed)
    }
}
