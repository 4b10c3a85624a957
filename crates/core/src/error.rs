//! Typed error hierarchy for the adaptive load controller.
//!
//! Errors are split by the phase in which they can occur, rather than collapsed into a
//! single flat enum: configuration errors are caught at construction, task-init errors
//! abort a run before any dispatch happens, and shutdown errors aggregate whatever went
//! wrong while draining in-flight work.

use std::time::Duration;
use thiserror::Error;

/// An `AdaptiveConfig` or `EngineConfig` field was out of its valid range.
///
/// Raised by [`crate::config::AdaptiveConfig::validate`] and by
/// [`crate::engine::ExecutionEngineBuilder::build`]; never reaches the control loop.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be greater than 0, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("{field} must be in [0, 1], got {value}")]
    NotUnitRange { field: &'static str, value: f64 },

    #[error("min_tps ({min}) must be less than max_tps ({max})")]
    MinNotLessThanMax { min: f64, max: f64 },

    #[error("bp_ramp_up_threshold ({up}) must be less than bp_ramp_down_threshold ({down})")]
    BackpressureThresholdsInverted { up: f64, down: f64 },

    #[error("stable_intervals_required must be at least 1, got {0}")]
    StableIntervalsTooLow(u32),

    #[error("engine builder is missing required field: {0}")]
    MissingField(&'static str),
}

/// The task's `init()` failed before any dispatch could begin.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("task initialization failed: {0}")]
    TaskInitFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine has already been closed")]
    AlreadyClosed,
}

/// One callback that failed or timed out during shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownCallbackFailure {
    pub label: String,
    pub kind: ShutdownFailureKind,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownFailureKind {
    TimedOut,
    Panicked,
    Errored,
}

/// Raised when `run()` completes with one or more shutdown-callback failures queued.
///
/// Carries every suppressed cause, not just the first, so a caller can see the full
/// picture of what went wrong while draining.
#[derive(Error, Debug, Clone)]
#[error("{} shutdown callback(s) failed: {}", .0.len(), summarize(.0))]
pub struct ShutdownError(pub Vec<ShutdownCallbackFailure>);

/// What `ExecutionEngine::run` can surface to its caller, per the propagation policy of
/// §7: only configuration errors (rejected earlier, at `build()`), task-init failures,
/// and aggregated shutdown-callback failures ever reach here.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Init(#[from] EngineError),
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

fn summarize(failures: &[ShutdownCallbackFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({:?}, {:?})", f.label, f.kind, f.elapsed))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::NotPositive {
            field: "initial_tps",
            value: -1.0,
        };
        assert_eq!(
            err.to_string(),
            "initial_tps must be greater than 0, got -1"
        );
    }

    #[test]
    fn shutdown_error_summarizes_all_failures() {
        let err = ShutdownError(vec![
            ShutdownCallbackFailure {
                label: "metrics_flush".into(),
                kind: ShutdownFailureKind::TimedOut,
                elapsed: Duration::from_secs(5),
            },
            ShutdownCallbackFailure {
                label: "audit_log".into(),
                kind: ShutdownFailureKind::Errored,
                elapsed: Duration::from_millis(12),
            },
        ]);
        let msg = err.to_string();
        assert!(msg.contains("2 shutdown callback"));
        assert!(msg.contains("metrics_flush"));
        assert!(msg.contains("audit_log"));
    }
}
