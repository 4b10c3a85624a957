//! Adaptive load controller core.
//!
//! Drives a user-supplied [`Task`](engine::Task) against a varying target throughput,
//! continuously searching for the highest sustainable rate a system under test can
//! absorb without violating an error-rate or backpressure threshold.
//!
//! # Architecture
//!
//! ```text
//! MetricsSink → FeedbackProvider → DecisionPolicy → AdaptiveController → RateController → ExecutionEngine
//! ```

pub mod adaptive;
pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod metrics;
pub mod pattern;
pub mod rate;

pub use adaptive::{AdaptiveController, AdaptiveState, Phase};
pub use config::{AdaptiveConfig, EngineConfig, WorkerPoolKind};
pub use engine::{
    EngineHandle, ExecutionEngine, ExecutionEngineBuilder, ShutdownCallback, Task, ThreadAffinity,
    WorkerPool,
};
pub use error::{ConfigError, EngineError, RunError, ShutdownError};
pub use feedback::{CachedFeedbackProvider, FeedbackProvider, FeedbackSnapshot};
pub use metrics::{AggregatedMetrics, HdrMetricsSink, MetricsSink, Outcome};
pub use pattern::{BackpressureProvider, LoadPattern, MetricsProvider};
pub use rate::RateController;
