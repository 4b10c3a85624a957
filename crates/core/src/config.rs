//! Validated, serde-(de)serialisable configuration records.
//!
//! Validation happens once, at construction, via [`ConfigError`] — never inside the hot
//! loop. The core does not parse files or flags itself; a caller-owned config layer or
//! CLI populates these structs and hands them to the builder.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

/// Tuning knobs for the adaptive pattern state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    pub initial_tps: f64,
    pub ramp_increment: f64,
    pub ramp_decrement: f64,
    pub ramp_interval: Duration,
    pub max_tps: f64,
    pub min_tps: f64,
    pub sustain_duration: Duration,
    pub error_threshold: f64,
    pub bp_ramp_up_threshold: f64,
    pub bp_ramp_down_threshold: f64,
    pub stable_intervals_required: u32,
    pub tps_tolerance: f64,
    pub recovery_tps_ratio: f64,
    #[serde(default = "default_metrics_batch_interval")]
    pub metrics_batch_interval: Duration,
}

fn default_metrics_batch_interval() -> Duration {
    Duration::from_millis(100)
}

impl AdaptiveConfig {
    /// Validates every field and returns the config unchanged, or the first violation.
    pub fn validate(self) -> Result<Self, ConfigError> {
        check_positive("initial_tps", self.initial_tps)?;
        check_positive("ramp_increment", self.ramp_increment)?;
        check_positive("ramp_decrement", self.ramp_decrement)?;
        if self.ramp_interval.is_zero() {
            return Err(ConfigError::NotPositive {
                field: "ramp_interval",
                value: 0.0,
            });
        }
        check_positive("max_tps", self.max_tps)?;
        if self.min_tps < 0.0 {
            return Err(ConfigError::NotPositive {
                field: "min_tps",
                value: self.min_tps,
            });
        }
        if self.sustain_duration.is_zero() {
            return Err(ConfigError::NotPositive {
                field: "sustain_duration",
                value: 0.0,
            });
        }
        check_unit_range("error_threshold", self.error_threshold)?;
        check_unit_range("bp_ramp_up_threshold", self.bp_ramp_up_threshold)?;
        check_unit_range("bp_ramp_down_threshold", self.bp_ramp_down_threshold)?;
        check_unit_range("recovery_tps_ratio", self.recovery_tps_ratio)?;

        if self.min_tps >= self.max_tps {
            return Err(ConfigError::MinNotLessThanMax {
                min: self.min_tps,
                max: self.max_tps,
            });
        }
        if self.bp_ramp_up_threshold >= self.bp_ramp_down_threshold {
            return Err(ConfigError::BackpressureThresholdsInverted {
                up: self.bp_ramp_up_threshold,
                down: self.bp_ramp_down_threshold,
            });
        }
        if self.stable_intervals_required < 1 {
            return Err(ConfigError::StableIntervalsTooLow(
                self.stable_intervals_required,
            ));
        }
        if self.tps_tolerance < 0.0 {
            return Err(ConfigError::NotPositive {
                field: "tps_tolerance",
                value: self.tps_tolerance,
            });
        }

        Ok(self)
    }
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            initial_tps: 10.0,
            ramp_increment: 5.0,
            ramp_decrement: 10.0,
            ramp_interval: Duration::from_secs(1),
            max_tps: 1000.0,
            min_tps: 1.0,
            sustain_duration: Duration::from_secs(30),
            error_threshold: 0.05,
            bp_ramp_up_threshold: 0.3,
            bp_ramp_down_threshold: 0.7,
            stable_intervals_required: 3,
            tps_tolerance: 1.0,
            recovery_tps_ratio: 0.5,
            metrics_batch_interval: default_metrics_batch_interval(),
        }
    }
}

fn check_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}

fn check_unit_range(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::NotUnitRange { field, value })
    }
}

/// Engine-level knobs independent of the adaptive pattern: shutdown grace periods,
/// worker pool shape, and whether the process-wide signal hook is installed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub drain_timeout: Duration,
    pub force_timeout: Duration,
    pub shutdown_callback_timeout: Duration,
    pub shutdown_hook_enabled: bool,
    pub worker_pool: WorkerPoolKind,
    pub metrics_percentiles: Vec<f64>,
    pub recent_window: Duration,
}

/// Which worker pool shape the engine should use for dispatching task executions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum WorkerPoolKind {
    /// One lightweight async task per dispatch, bounded by `max_in_flight`.
    Lightweight { max_in_flight: usize },
    /// A fixed pool of OS threads. `None` resolves to the number of available cores.
    OsThreadPool { size: Option<usize> },
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(5),
            force_timeout: Duration::from_secs(10),
            shutdown_callback_timeout: Duration::from_secs(5),
            shutdown_hook_enabled: true,
            worker_pool: WorkerPoolKind::Lightweight {
                max_in_flight: 10_000,
            },
            metrics_percentiles: vec![0.5, 0.95, 0.99],
            recent_window: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(AdaptiveConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_initial_tps() {
        let cfg = AdaptiveConfig {
            initial_tps: 0.0,
            ..AdaptiveConfig::default()
        };
        assert_eq!(
            cfg.validate().unwrap_err(),
            ConfigError::NotPositive {
                field: "initial_tps",
                value: 0.0
            }
        );
    }

    #[test]
    fn rejects_min_not_less_than_max() {
        let cfg = AdaptiveConfig {
            min_tps: 100.0,
            max_tps: 50.0,
            ..AdaptiveConfig::default()
        };
        assert!(matches!(
            cfg.validate().unwrap_err(),
            ConfigError::MinNotLessThanMax { .. }
        ));
    }

    #[test]
    fn rejects_inverted_backpressure_thresholds() {
        let cfg = AdaptiveConfig {
            bp_ramp_up_threshold: 0.8,
            bp_ramp_down_threshold: 0.2,
            ..AdaptiveConfig::default()
        };
        assert!(matches!(
            cfg.validate().unwrap_err(),
            ConfigError::BackpressureThresholdsInverted { .. }
        ));
    }

    #[test]
    fn rejects_zero_stable_intervals() {
        let cfg = AdaptiveConfig {
            stable_intervals_required: 0,
            ..AdaptiveConfig::default()
        };
        assert!(matches!(
            cfg.validate().unwrap_err(),
            ConfigError::StableIntervalsTooLow(0)
        ));
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = AdaptiveConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: AdaptiveConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
