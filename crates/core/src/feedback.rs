//! Cached, smoothed feedback signals for the decision policy.
//!
//! The adaptive loop samples at most once per `ramp_interval`, but a polling path may
//! call `get_snapshot` many times a second; the underlying [`MetricsSink`] snapshot is
//! cached for a batching window. The recent-window failure rate is backed by a bounded
//! ring buffer of per-second `(success, failure)` counts rather than per-execution
//! history, so memory use stays flat regardless of run length.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::metrics::MetricsSink;

/// A consistent, immutable view of feedback at one point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedbackSnapshot {
    pub failure_rate: f64,
    pub recent_failure_rate: f64,
    pub backpressure: f64,
    pub total_executions: u64,
}

/// Exposes feedback signals to the decision policy. Never panics or propagates errors:
/// if the underlying sink is unavailable, implementations fall back to the last known
/// snapshot or a zero-initialised one.
pub trait FeedbackProvider: Send + Sync {
    fn get_snapshot(&self, now: Instant) -> FeedbackSnapshot;
}

struct WindowSample {
    at: Instant,
    success: u64,
    failure: u64,
}

/// Default [`FeedbackProvider`]: wraps a [`MetricsSink`] and an optional backpressure
/// source, caching both behind a batching window.
pub struct CachedFeedbackProvider {
    sink: std::sync::Arc<dyn MetricsSink>,
    backpressure: Option<std::sync::Arc<dyn Fn() -> f64 + Send + Sync>>,
    batch_interval: Duration,
    recent_window: Duration,
    state: Mutex<ProviderState>,
}

struct ProviderState {
    last_batched: Option<(Instant, FeedbackSnapshot)>,
    ring: VecDeque<WindowSample>,
    last_totals: (u64, u64), // (success, failure) as of last ring push
}

impl CachedFeedbackProvider {
    pub fn new(
        sink: std::sync::Arc<dyn MetricsSink>,
        backpressure: Option<std::sync::Arc<dyn Fn() -> f64 + Send + Sync>>,
        batch_interval: Duration,
        recent_window: Duration,
    ) -> Self {
        Self {
            sink,
            backpressure,
            batch_interval,
            recent_window,
            state: Mutex::new(ProviderState {
                last_batched: None,
                ring: VecDeque::new(),
                last_totals: (0, 0),
            }),
        }
    }

    fn push_window_sample(&self, state: &mut ProviderState, now: Instant, success: u64, failure: u64) {
        let (prev_success, prev_failure) = state.last_totals;
        state.ring.push_back(WindowSample {
            at: now,
            success: success.saturating_sub(prev_success),
            failure: failure.saturating_sub(prev_failure),
        });
        state.last_totals = (success, failure);

        let cutoff = now
            .checked_sub(self.recent_window)
            .unwrap_or(now);
        while let Some(front) = state.ring.front() {
            if front.at < cutoff {
                state.ring.pop_front();
            } else {
                break;
            }
        }
    }

    fn recent_failure_rate(&self, state: &ProviderState, overall: f64) -> f64 {
        let (success, failure) = state
            .ring
            .iter()
            .fold((0u64, 0u64), |(s, f), sample| (s + sample.success, f + sample.failure));
        let total = success + failure;
        if total == 0 {
            overall
        } else {
            failure as f64 / total as f64
        }
    }
}

impl FeedbackProvider for CachedFeedbackProvider {
    fn get_snapshot(&self, now: Instant) -> FeedbackSnapshot {
        let mut state = self.state.lock().expect("feedback provider lock poisoned");

        if let Some((last, cached)) = state.last_batched {
            if now.saturating_duration_since(last) < self.batch_interval {
                return cached;
            }
        }

        let agg = self.sink.snapshot();
        let overall = agg.failure_rate_pct / 100.0;

        self.push_window_sample(&mut state, now, agg.success_count, agg.failure_count);
        let recent = self.recent_failure_rate(&state, overall);
        let backpressure = self.backpressure.as_ref().map(|f| f()).unwrap_or(0.0).clamp(0.0, 1.0);

        let snapshot = FeedbackSnapshot {
            failure_rate: overall,
            recent_failure_rate: recent,
            backpressure,
            total_executions: agg.total_executions,
        };
        state.last_batched = Some((now, snapshot));
        snapshot
    }
}
