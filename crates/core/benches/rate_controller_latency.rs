//! Measures `RateController::wait_for_next`'s per-call overhead in isolation from any
//! task execution, at a target TPS high enough that the spin-wait path dominates.

use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use ramp_core::{LoadPattern, RateController};
use tokio::runtime::Runtime;

struct ConstantPattern {
    tps: f64,
}

impl LoadPattern for ConstantPattern {
    fn tps(&self, _elapsed: Duration) -> f64 {
        self.tps
    }

    fn duration(&self) -> Duration {
        Duration::from_secs(3600)
    }
}

fn wait_for_next_overhead(c: &mut Criterion) {
    let rt = Runtime::new().expect("failed to build benchmark runtime");

    let mut group = c.benchmark_group("rate_controller_wait_for_next");
    for tps in [100.0, 1_000.0, 10_000.0] {
        group.bench_function(format!("tps_{tps}"), |b| {
            b.iter_batched(
                || RateController::new(ConstantPattern { tps }),
                |controller| {
                    rt.block_on(controller.wait_for_next());
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, wait_for_next_overhead);
criterion_main!(benches);
