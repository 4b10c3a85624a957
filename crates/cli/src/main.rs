//! A thin demo binary for `ramp-core`: wires a seeded [`task::SimulatedTask`] through
//! [`ExecutionEngineBuilder`] behind an [`AdaptiveController`], prints a final metrics
//! snapshot, and exits non-zero on any reported failure. Everything the core's
//! Non-goals exclude (config files, alternative load patterns, trace exporters) stays
//! out of this binary too; it exists to exercise the builder surface, not to be a
//! complete load-testing tool.

mod task;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use miette::{IntoDiagnostic, Result};
use ramp_core::{
    AdaptiveConfig, AdaptiveController, CachedFeedbackProvider, ConfigError, EngineConfig,
    ExecutionEngineBuilder, HdrMetricsSink, MetricsSink, Phase, WorkerPoolKind,
};

use task::SimulatedTask;

#[derive(Parser)]
#[command(name = "ramp", version, about = "Adaptive load controller demo")]
struct Cli {
    /// Starting target throughput, in dispatches/second.
    #[arg(long, default_value_t = 10.0)]
    initial_tps: f64,

    /// Ceiling the ramp will not exceed.
    #[arg(long, default_value_t = 500.0)]
    max_tps: f64,

    /// Floor the ramp will not go below, even under sustained failure.
    #[arg(long, default_value_t = 1.0)]
    min_tps: f64,

    /// How much to add to current_tps per ramp-up decision.
    #[arg(long, default_value_t = 10.0)]
    ramp_increment: f64,

    /// How much to subtract from current_tps per ramp-down decision.
    #[arg(long, default_value_t = 20.0)]
    ramp_decrement: f64,

    /// How often the controller re-evaluates its phase, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    ramp_interval_ms: u64,

    /// Failure rate above which the controller starts ramping down.
    #[arg(long, default_value_t = 0.05)]
    error_threshold: f64,

    /// How long the whole demo run lasts, in seconds.
    #[arg(long, default_value_t = 60)]
    duration_secs: u64,

    /// Probability that any one simulated execution fails.
    #[arg(long, default_value_t = 0.02)]
    simulated_failure_rate: f64,

    /// Seed for the simulated task's RNG; fixing it makes a run reproducible.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Run the simulated task body on a fixed OS thread pool instead of lightweight
    /// async tasks; exercises the engine's other worker-pool shape.
    #[arg(long)]
    os_thread_pool: Option<usize>,

    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormat,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print the final metrics snapshot as JSON instead of a human-readable summary.
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

fn init_tracing(log_format: LogFormat, log_level: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
        .into_diagnostic()?;
    let fmt = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    match log_format {
        LogFormat::Json => fmt.json().init(),
        LogFormat::Pretty => fmt.init(),
    }
    Ok(())
}

impl Cli {
    fn adaptive_config(&self) -> Result<AdaptiveConfig> {
        AdaptiveConfig {
            initial_tps: self.initial_tps,
            ramp_increment: self.ramp_increment,
            ramp_decrement: self.ramp_decrement,
            ramp_interval: Duration::from_millis(self.ramp_interval_ms),
            max_tps: self.max_tps,
            min_tps: self.min_tps,
            error_threshold: self.error_threshold,
            ..AdaptiveConfig::default()
        }
        .validate()
        .map_err(config_error_to_diagnostic)
    }

    fn engine_config(&self) -> EngineConfig {
        let worker_pool = match self.os_thread_pool {
            Some(size) => WorkerPoolKind::OsThreadPool {
                size: Some(size).filter(|n| *n > 0),
            },
            None => WorkerPoolKind::Lightweight { max_in_flight: 10_000 },
        };
        EngineConfig {
            worker_pool,
            ..EngineConfig::default()
        }
    }
}

fn config_error_to_diagnostic(err: ConfigError) -> miette::Report {
    miette::Report::msg(err.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format, &cli.log_level)?;

    let adaptive_config = cli.adaptive_config()?;
    let engine_config = cli.engine_config();
    let metrics: Arc<dyn MetricsSink> =
        Arc::new(HdrMetricsSink::new(engine_config.metrics_percentiles.clone()));

    let feedback = Arc::new(CachedFeedbackProvider::new(
        Arc::clone(&metrics),
        None,
        adaptive_config.metrics_batch_interval,
        engine_config.recent_window,
    ));
    let controller = Arc::new(AdaptiveController::new(adaptive_config, feedback));

    let task = Arc::new(SimulatedTask::new(
        cli.seed,
        cli.simulated_failure_rate,
        Duration::from_millis(5),
        Duration::from_millis(50),
    ));

    let engine = Arc::new(
        ExecutionEngineBuilder::new()
            .with_task(task)
            .with_pattern(Arc::clone(&controller))
            .with_metrics(Arc::clone(&metrics))
            .with_run_id(format!("ramp-demo-{}", cli.seed))
            .with_config(engine_config)
            .build()
            .map_err(config_error_to_diagnostic)?,
    );

    let handle = engine.handle();
    let engine_for_run = Arc::clone(&engine);
    let run_task = tokio::spawn(async move { engine_for_run.run().await });

    tokio::time::sleep(Duration::from_secs(cli.duration_secs)).await;
    handle.stop();

    let result = run_task.await.into_diagnostic()?;

    let snapshot = metrics.snapshot();
    let final_phase = controller.state().phase;

    if cli.json {
        println!(
            "{}",
            serde_json::json!({
                "run_id": engine.run_id(),
                "final_phase": format!("{final_phase:?}"),
                "final_tps": controller.state().current_tps,
                "total_executions": snapshot.total_executions,
                "success_count": snapshot.success_count,
                "failure_count": snapshot.failure_count,
                "failure_rate_pct": snapshot.failure_rate_pct,
                "response_tps": snapshot.response_tps,
            })
        );
    } else {
        println!("run_id: {}", engine.run_id());
        println!("final phase: {final_phase:?} @ {:.1} tps", controller.state().current_tps);
        println!(
            "executions: {} ({} success, {} failure, {:.2}% failure rate)",
            snapshot.total_executions, snapshot.success_count, snapshot.failure_count, snapshot.failure_rate_pct
        );
        println!("achieved throughput: {:.1} tps", snapshot.response_tps);
        if final_phase == Phase::Sustain {
            println!("sustained throughput ceiling found before the run ended.");
        }
    }

    match result {
        Ok(()) => Ok(()),
        Err(err) => Err(miette::Report::msg(err.to_string())),
    }
}
