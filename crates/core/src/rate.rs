//! Paces dispatches to match a [`LoadPattern`]'s target TPS at sub-millisecond accuracy.
//!
//! Pacing uses absolute deadlines rather than relative sleeps: the next-fire instant is
//! advanced by one nominal period *before* the dispatch happens, so a slow dispatch
//! never compounds drift into the next one — the same self-correcting idiom used by
//! comparable load generators' worker loops. Sub-millisecond sleeps spin instead of
//! parking, since the OS timer wheel's resolution is coarser than that on most
//! platforms.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::time::Instant as TokioInstant;

use crate::pattern::LoadPattern;

const SPIN_THRESHOLD: Duration = Duration::from_millis(1);
const MAX_SLEEP: Duration = Duration::from_secs(1);
const ELAPSED_CACHE_WINDOW: Duration = Duration::from_millis(10);

/// Paces calls to match `pattern.tps(elapsed)`.
pub struct RateController<P: LoadPattern> {
    pattern: P,
    test_start: Instant,
    tokio_start: TokioInstant,
    execution_count: AtomicU64,
    cached_elapsed: std::sync::Mutex<(Instant, Duration)>,
}

impl<P: LoadPattern> RateController<P> {
    pub fn new(pattern: P) -> Self {
        let now = Instant::now();
        Self {
            pattern,
            test_start: now,
            tokio_start: TokioInstant::now(),
            execution_count: AtomicU64::new(0),
            cached_elapsed: std::sync::Mutex::new((now, Duration::ZERO)),
        }
    }

    pub fn pattern(&self) -> &P {
        &self.pattern
    }

    /// Monotonic time since construction, cached for up to [`ELAPSED_CACHE_WINDOW`] to
    /// amortise clock reads on the hot path.
    pub fn elapsed(&self) -> Duration {
        let now = Instant::now();
        let mut cached = self.cached_elapsed.lock().expect("rate controller lock poisoned");
        if now.saturating_duration_since(cached.0) >= ELAPSED_CACHE_WINDOW {
            *cached = (now, now.saturating_duration_since(self.test_start));
        }
        cached.1
    }

    /// Blocks until the next dispatch slot is due. Returns the target TPS observed for
    /// this slot, so callers don't need a second `pattern.tps()` call.
    pub async fn wait_for_next(&self) -> f64 {
        let count = self.execution_count.fetch_add(1, Ordering::SeqCst) + 1;
        let elapsed = self.elapsed();
        let target_tps = self.pattern.tps(elapsed);

        if target_tps <= 0.0 {
            return target_tps;
        }

        let expected_count = (target_tps * elapsed.as_secs_f64()).floor() as u64;
        if count <= expected_count {
            return target_tps;
        }

        let period_ns = (1e9 / target_tps) as u64;
        let target_offset = Duration::from_nanos(count.saturating_mul(period_ns));
        let deadline = self.tokio_start + target_offset;
        let sleep_for = deadline.saturating_duration_since(TokioInstant::now());

        if sleep_for.is_zero() {
            return target_tps;
        }
        let capped = sleep_for.min(MAX_SLEEP);

        if capped < SPIN_THRESHOLD {
            spin_until(deadline);
        } else {
            tokio::time::sleep_until(self.tokio_start + target_offset.min(
                (TokioInstant::now() - self.tokio_start) + capped,
            ))
            .await;
        }
        target_tps
    }
}

fn spin_until(deadline: TokioInstant) {
    while TokioInstant::now() < deadline {
        std::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64 as StdAtomicU64;
    use std::sync::Arc;

    struct ConstantPattern {
        tps: f64,
        calls: Arc<StdAtomicU64>,
    }

    impl LoadPattern for ConstantPattern {
        fn tps(&self, _elapsed: Duration) -> f64 {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.tps
        }
        fn duration(&self) -> Duration {
            Duration::from_secs(60)
        }
    }

    #[tokio::test]
    async fn paces_dispatches_close_to_target_tps() {
        let calls = Arc::new(StdAtomicU64::new(0));
        let controller = RateController::new(ConstantPattern { tps: 200.0, calls });
        let start = Instant::now();
        let mut dispatched = 0u64;
        while start.elapsed() < Duration::from_millis(250) {
            controller.wait_for_next().await;
            dispatched += 1;
        }
        // 200 tps over ~0.25s should be close to 50 dispatches; pacing loop overhead
        // means we tolerate a fairly wide band rather than asserting exact counts.
        assert!(dispatched >= 30 && dispatched <= 70, "dispatched={dispatched}");
    }

    #[tokio::test]
    async fn zero_tps_returns_immediately() {
        let calls = Arc::new(StdAtomicU64::new(0));
        let controller = RateController::new(ConstantPattern { tps: 0.0, calls });
        let start = Instant::now();
        for _ in 0..5 {
            controller.wait_for_next().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
