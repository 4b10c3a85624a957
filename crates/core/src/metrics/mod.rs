//! Per-execution outcome recording and aggregate snapshots.
//!
//! The default implementation, [`HdrMetricsSink`], backs its percentile estimators with
//! `hdrhistogram::Histogram` instances behind short-held mutexes — recording is a single
//! `record()` call, snapshotting clones the (small) histogram state. Counters are plain
//! atomics with relaxed increments and acquire-ordered snapshot reads.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use hdrhistogram::Histogram;

/// The outcome of one task execution.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success,
    Failure(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// One completed execution, as handed to [`MetricsSink::record`].
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub start: Instant,
    pub end: Instant,
    pub outcome: Outcome,
    pub iteration: u64,
}

impl ExecutionRecord {
    pub fn latency(&self) -> std::time::Duration {
        self.end.saturating_duration_since(self.start)
    }
}

/// Point-in-time view of everything a [`MetricsSink`] has recorded.
///
/// `total_executions == success_count + failure_count` always holds. Percentage fields
/// are in `[0, 100]`; percentile maps use the same key set the sink was configured with.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedMetrics {
    pub total_executions: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub failure_rate_pct: f64,
    pub success_rate_pct: f64,
    pub success_latency_percentiles_us: Vec<(f64, u64)>,
    pub failure_latency_percentiles_us: Vec<(f64, u64)>,
    pub queue_wait_percentiles_us: Vec<(f64, u64)>,
    pub response_tps: f64,
    pub success_tps: f64,
    pub in_flight: i64,
}

/// Records per-execution outcomes and produces aggregate snapshots.
///
/// Implementations must be safe for many concurrent callers and must never block a
/// producer on `snapshot()` for more than a short, bounded critical section.
pub trait MetricsSink: Send + Sync {
    fn record(&self, record: ExecutionRecord);
    fn record_queue_wait(&self, nanos: u64);
    fn update_queue_size(&self, delta: i64);
    fn snapshot(&self) -> AggregatedMetrics;
    fn total_executions(&self) -> u64;
    fn failure_count(&self) -> u64;
}

/// Default [`MetricsSink`]: `hdrhistogram`-backed percentile tracking with a
/// configurable percentile set (default `{0.5, 0.95, 0.99}`).
pub struct HdrMetricsSink {
    test_start: Instant,
    percentiles: Vec<f64>,
    total_executions: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    in_flight: AtomicI64,
    success_latency_us: Mutex<Histogram<u64>>,
    failure_latency_us: Mutex<Histogram<u64>>,
    queue_wait_us: Mutex<Histogram<u64>>,
}

impl HdrMetricsSink {
    pub fn new(percentiles: Vec<f64>) -> Self {
        // 3 significant figures is enough precision for microsecond latencies up to
        // several minutes and keeps the histogram's memory footprint small.
        let new_histogram = || Histogram::<u64>::new(3).expect("valid histogram precision");
        Self {
            test_start: Instant::now(),
            percentiles,
            total_executions: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            in_flight: AtomicI64::new(0),
            success_latency_us: Mutex::new(new_histogram()),
            failure_latency_us: Mutex::new(new_histogram()),
            queue_wait_us: Mutex::new(new_histogram()),
        }
    }

    fn percentiles_of(&self, hist: &Histogram<u64>) -> Vec<(f64, u64)> {
        self.percentiles
            .iter()
            .map(|p| (*p, hist.value_at_quantile(*p)))
            .collect()
    }
}

impl Default for HdrMetricsSink {
    fn default() -> Self {
        Self::new(vec![0.5, 0.95, 0.99])
    }
}

impl MetricsSink for HdrMetricsSink {
    fn record(&self, record: ExecutionRecord) {
        self.total_executions.fetch_add(1, Ordering::Relaxed);
        let latency_us = record.latency().as_micros().min(u64::MAX as u128) as u64;
        match record.outcome {
            Outcome::Success => {
                self.success_count.fetch_add(1, Ordering::Relaxed);
                let _ = self
                    .success_latency_us
                    .lock()
                    .expect("histogram lock poisoned")
                    .record(latency_us);
            }
            Outcome::Failure(_) => {
                self.failure_count.fetch_add(1, Ordering::Relaxed);
                let _ = self
                    .failure_latency_us
                    .lock()
                    .expect("histogram lock poisoned")
                    .record(latency_us);
            }
        }
    }

    fn record_queue_wait(&self, nanos: u64) {
        let _ = self
            .queue_wait_us
            .lock()
            .expect("histogram lock poisoned")
            .record(nanos / 1_000);
    }

    fn update_queue_size(&self, delta: i64) {
        self.in_flight.fetch_add(delta, Ordering::Relaxed);
    }

    fn snapshot(&self) -> AggregatedMetrics {
        let total = self.total_executions.load(Ordering::Acquire);
        let success = self.success_count.load(Ordering::Acquire);
        let failure = self.failure_count.load(Ordering::Acquire);
        let elapsed_secs = self.test_start.elapsed().as_secs_f64().max(1e-9);

        let success_hist = self.success_latency_us.lock().expect("lock poisoned");
        let failure_hist = self.failure_latency_us.lock().expect("lock poisoned");
        let queue_hist = self.queue_wait_us.lock().expect("lock poisoned");

        AggregatedMetrics {
            total_executions: total,
            success_count: success,
            failure_count: failure,
            failure_rate_pct: if total > 0 {
                failure as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            success_rate_pct: if total > 0 {
                success as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            success_latency_percentiles_us: self.percentiles_of(&success_hist),
            failure_latency_percentiles_us: self.percentiles_of(&failure_hist),
            queue_wait_percentiles_us: self.percentiles_of(&queue_hist),
            response_tps: total as f64 / elapsed_secs,
            success_tps: success as f64 / elapsed_secs,
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }

    fn total_executions(&self) -> u64 {
        self.total_executions.load(Ordering::Acquire)
    }

    fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(outcome: Outcome) -> ExecutionRecord {
        let start = Instant::now();
        ExecutionRecord {
            start,
            end: start + Duration::from_micros(500),
            outcome,
            iteration: 0,
        }
    }

    #[test]
    fn total_equals_success_plus_failure() {
        let sink = HdrMetricsSink::default();
        for _ in 0..7 {
            sink.record(record(Outcome::Success));
        }
        for _ in 0..3 {
            sink.record(record(Outcome::Failure("boom".into())));
        }
        let snap = sink.snapshot();
        assert_eq!(snap.total_executions, 10);
        assert_eq!(snap.success_count + snap.failure_count, snap.total_executions);
        assert!((snap.failure_rate_pct - 30.0).abs() < 1e-9);
    }

    #[test]
    fn queue_size_tracks_in_flight() {
        let sink = HdrMetricsSink::default();
        sink.update_queue_size(1);
        sink.update_queue_size(1);
        sink.update_queue_size(-1);
        assert_eq!(sink.snapshot().in_flight, 1);
    }

    #[test]
    fn percentiles_are_nondecreasing_in_quantile() {
        let sink = HdrMetricsSink::new(vec![0.5, 0.95, 0.99]);
        for us in [100, 200, 300, 10_000] {
            sink.record(ExecutionRecord {
                start: Instant::now(),
                end: Instant::now() + Duration::from_micros(us),
                outcome: Outcome::Success,
                iteration: 0,
            });
        }
        let snap = sink.snapshot();
        let values: Vec<u64> = snap
            .success_latency_percentiles_us
            .iter()
            .map(|(_, v)| *v)
            .collect();
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
    }
}
