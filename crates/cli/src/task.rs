//! A deterministic, seeded `Task` used to exercise the engine without a real
//! system-under-test: latency and failure rate are drawn from a `ChaCha8Rng` so a given
//! `--seed` always reproduces the same run.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use ramp_core::{Outcome, Task};

/// Simulates a system-under-test whose failure probability is fixed and whose latency is
/// drawn uniformly from `[latency_floor, latency_ceiling)`.
pub struct SimulatedTask {
    rng: Mutex<ChaCha8Rng>,
    failure_rate: f64,
    latency_floor: Duration,
    latency_ceiling: Duration,
}

impl SimulatedTask {
    pub fn new(seed: u64, failure_rate: f64, latency_floor: Duration, latency_ceiling: Duration) -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            failure_rate: failure_rate.clamp(0.0, 1.0),
            latency_floor,
            latency_ceiling: latency_ceiling.max(latency_floor + Duration::from_micros(1)),
        }
    }
}

#[async_trait]
impl Task for SimulatedTask {
    async fn execute(&self, iteration: u64) -> Outcome {
        let (sleep_for, is_failure) = {
            let mut rng = self.rng.lock().expect("simulated task rng lock poisoned");
            let sleep_for = rng.random_range(self.latency_floor..self.latency_ceiling);
            let is_failure = rng.random_bool(self.failure_rate);
            (sleep_for, is_failure)
        };

        tokio::time::sleep(sleep_for).await;

        if is_failure {
            Outcome::Failure(format!("simulated failure on iteration {iteration}"))
        } else {
            Outcome::Success
        }
    }
}
