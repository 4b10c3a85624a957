//! Lifecycle (init → dispatch loop → teardown), worker pool selection, queue-depth
//! tracking, and graceful shutdown. This is the component that wires C1–C5 together: it
//! calls [`RateController::wait_for_next`] to pace, hands completed work to the chosen
//! [`WorkerPool`], and folds outcomes into the configured [`MetricsSink`].

pub mod shutdown;
pub mod task;
pub mod worker_pool;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::config::{EngineConfig, WorkerPoolKind};
use crate::error::{ConfigError, EngineError, RunError, ShutdownError};
use crate::metrics::{ExecutionRecord, MetricsSink, Outcome};
use crate::pattern::LoadPattern;
use crate::rate::RateController;

pub use shutdown::ShutdownCallback;
pub use task::{Task, ThreadAffinity};
pub use worker_pool::{BoxedJob, LightweightPool, OsThreadPool, WorkerPool};

/// The engine's coarse lifecycle state, exposed only for builder idempotency checks —
/// callers observe progress through `PatternListener`s and `MetricsSink` snapshots, not
/// through this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// A cheap, cloneable remote control for a running [`ExecutionEngine`]: the only thing an
/// external caller (or a signal handler) needs to request graceful termination.
#[derive(Clone)]
pub struct EngineHandle {
    stop_flag: Arc<AtomicBool>,
}

impl EngineHandle {
    /// Idempotent: calling this more than once, or after the engine has already
    /// stopped, has no additional effect.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }
}

/// Drives one full test lifecycle against a [`Task`], pacing dispatches with a
/// [`RateController`] wrapped around a [`LoadPattern`] (typically
/// [`crate::adaptive::AdaptiveController`]).
pub struct ExecutionEngine<P: LoadPattern> {
    task: Arc<dyn Task>,
    rate: RateController<P>,
    metrics: Arc<dyn MetricsSink>,
    worker_pool: Box<dyn WorkerPool>,
    engine_config: EngineConfig,
    run_id: String,
    stop_flag: Arc<AtomicBool>,
    state: AsyncMutex<EngineState>,
    shutdown_callbacks: Vec<(String, ShutdownCallback)>,
    signal_task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl<P: LoadPattern + 'static> ExecutionEngine<P> {
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            stop_flag: Arc::clone(&self.stop_flag),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Idempotent: a second call while already stopping/stopped just sets a flag that is
    /// already set.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }

    /// Runs the full lifecycle described in §4.6: `task.init()`, the paced dispatch loop,
    /// two-stage worker-pool drain, `task.teardown()`, and shutdown-callback execution.
    #[tracing::instrument(skip(self), fields(run_id = %self.run_id))]
    pub async fn run(&self) -> Result<(), RunError> {
        {
            let mut state = self.state.lock().await;
            if *state != EngineState::Idle {
                return Err(RunError::Init(EngineError::AlreadyRunning));
            }
            *state = EngineState::Running;
        }

        let run_start = Instant::now();
        tracing::info!("engine starting");

        if self.engine_config.shutdown_hook_enabled {
            let stop_flag = Arc::clone(&self.stop_flag);
            let mut signal_task = self.signal_task.lock().await;
            *signal_task = Some(tokio::spawn(shutdown::run_signal_hook(stop_flag)));
        }

        if let Err(err) = self.task.init().await {
            tracing::error!(error = %err, "task init failed, aborting before any dispatch");
            self.worker_pool.force_cancel(Duration::ZERO).await;
            *self.state.lock().await = EngineState::Stopped;
            return Err(RunError::Init(EngineError::TaskInitFailed(err)));
        }

        self.dispatch_loop().await;

        *self.state.lock().await = EngineState::Stopping;
        tracing::info!("dispatch loop stopped, draining worker pool");
        if !self.worker_pool.drain(self.engine_config.drain_timeout).await {
            tracing::warn!(
                drain_timeout_secs = self.engine_config.drain_timeout.as_secs_f64(),
                "drain timed out, force-cancelling remaining work"
            );
            self.worker_pool
                .force_cancel(self.engine_config.force_timeout)
                .await;
        }

        if let Err(err) = self.task.teardown().await {
            tracing::warn!(error = %err, "task teardown failed");
        }

        let failures = self.run_shutdown_callbacks().await;

        if let Some(signal_task) = self.signal_task.lock().await.take() {
            signal_task.abort();
        }

        *self.state.lock().await = EngineState::Stopped;
        tracing::info!(uptime_secs = run_start.elapsed().as_secs_f64(), "engine stopped");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RunError::Shutdown(ShutdownError(failures)))
        }
    }

    /// Releases engine resources. Idempotent — calling this after `run()` has already
    /// completed (or before it was ever called) is a no-op.
    pub async fn close(&self) {
        if let Some(signal_task) = self.signal_task.lock().await.take() {
            signal_task.abort();
        }
    }

    async fn dispatch_loop(&self) {
        let mut iterations: u64 = 0;
        loop {
            if self.stop_flag.load(Ordering::Acquire) {
                tracing::debug!("stop requested, exiting dispatch loop");
                break;
            }
            if self.rate.elapsed() >= self.rate.pattern().duration() {
                tracing::debug!("pattern duration reached, exiting dispatch loop");
                break;
            }

            let target_tps = self.rate.wait_for_next().await;
            iterations += 1;
            let elapsed = self.rate.elapsed();

            // Conservative pause-forever heuristic: only fires once the pattern has had
            // time to ramp off zero, so patterns that start at 0 TPS aren't mistaken for
            // "test over" in their first moments.
            if iterations >= 10 && elapsed > Duration::from_millis(100) && target_tps <= 0.0 {
                tracing::debug!("pattern signalled pause-forever, stopping dispatch loop");
                break;
            }
            if self.stop_flag.load(Ordering::Acquire) {
                break;
            }

            let should_record = self.rate.pattern().should_record_metrics(elapsed);
            self.metrics.update_queue_size(1);

            let iteration = iterations;
            let task = Arc::clone(&self.task);
            let metrics = Arc::clone(&self.metrics);
            let queue_start = Instant::now();

            let job: BoxedJob = Box::pin(async move {
                if should_record {
                    metrics.record_queue_wait(queue_start.elapsed().as_nanos() as u64);
                }
                metrics.update_queue_size(-1);

                let start = Instant::now();
                // Spawned on its own task so an unwind inside `execute` surfaces as a
                // `JoinError` rather than taking down the worker that is driving it;
                // converted into a failure outcome rather than propagated, per the
                // task-execute-failure policy in the error taxonomy.
                let executing_task = Arc::clone(&task);
                let outcome = match tokio::spawn(async move { executing_task.execute(iteration).await }).await {
                    Ok(outcome) => outcome,
                    Err(join_err) => {
                        tracing::warn!(iteration, error = %join_err, "task execute panicked");
                        Outcome::Failure(format!("execute panicked: {join_err}"))
                    }
                };
                let end = Instant::now();

                if should_record {
                    metrics.record(ExecutionRecord {
                        start,
                        end,
                        outcome,
                        iteration,
                    });
                }
            });
            self.worker_pool.submit(job).await;
        }
    }

    async fn run_shutdown_callbacks(&self) -> Vec<crate::error::ShutdownCallbackFailure> {
        let mut failures = Vec::new();
        for (label, callback) in &self.shutdown_callbacks {
            if let Some(failure) = shutdown::run_shutdown_callback(
                label,
                Arc::clone(callback),
                self.engine_config.shutdown_callback_timeout,
            )
            .await
            {
                failures.push(failure);
            }
        }
        failures
    }
}

/// Fluent builder for [`ExecutionEngine`], the one piece of "CLI surface" the core owns
/// — everything else (argument parsing, config files) is an external collaborator that
/// ends up calling this.
pub struct ExecutionEngineBuilder<P: LoadPattern> {
    task: Option<Arc<dyn Task>>,
    pattern: Option<P>,
    metrics: Option<Arc<dyn MetricsSink>>,
    run_id: Option<String>,
    shutdown_hook_enabled: bool,
    config: EngineConfig,
    shutdown_callbacks: Vec<(String, ShutdownCallback)>,
}

impl<P: LoadPattern> Default for ExecutionEngineBuilder<P> {
    fn default() -> Self {
        Self {
            task: None,
            pattern: None,
            metrics: None,
            run_id: None,
            shutdown_hook_enabled: true,
            config: EngineConfig::default(),
            shutdown_callbacks: Vec::new(),
        }
    }
}

impl<P: LoadPattern + 'static> ExecutionEngineBuilder<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(mut self, task: Arc<dyn Task>) -> Self {
        self.task = Some(task);
        self
    }

    pub fn with_pattern(mut self, pattern: P) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_shutdown_hook(mut self, enabled: bool) -> Self {
        self.shutdown_hook_enabled = enabled;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_shutdown_callback(mut self, label: impl Into<String>, callback: ShutdownCallback) -> Self {
        self.shutdown_callbacks.push((label.into(), callback));
        self
    }

    pub fn build(mut self) -> Result<ExecutionEngine<P>, ConfigError> {
        let task = self.task.take().ok_or(ConfigError::MissingField("task"))?;
        let pattern = self
            .pattern
            .take()
            .ok_or(ConfigError::MissingField("pattern"))?;
        let metrics = self
            .metrics
            .take()
            .ok_or(ConfigError::MissingField("metrics"))?;

        let worker_pool = build_worker_pool(task.thread_affinity(), &self.config.worker_pool);

        Ok(ExecutionEngine {
            task,
            rate: RateController::new(pattern),
            metrics,
            worker_pool,
            engine_config: EngineConfig {
                shutdown_hook_enabled: self.shutdown_hook_enabled,
                ..self.config
            },
            run_id: self.run_id.unwrap_or_else(|| "default".to_string()),
            stop_flag: Arc::new(AtomicBool::new(false)),
            state: AsyncMutex::new(EngineState::Idle),
            shutdown_callbacks: self.shutdown_callbacks,
            signal_task: AsyncMutex::new(None),
        })
    }
}

fn build_worker_pool(affinity: ThreadAffinity, configured: &WorkerPoolKind) -> Box<dyn WorkerPool> {
    match affinity {
        ThreadAffinity::Lightweight => {
            let max_in_flight = match configured {
                WorkerPoolKind::Lightweight { max_in_flight } => *max_in_flight,
                WorkerPoolKind::OsThreadPool { .. } => 10_000,
            };
            Box::new(LightweightPool::new(max_in_flight))
        }
        ThreadAffinity::OsThreadPool(requested_size) => {
            let configured_size = match configured {
                WorkerPoolKind::OsThreadPool { size } => *size,
                WorkerPoolKind::Lightweight { .. } => None,
            };
            let size = requested_size
                .or(configured_size)
                .unwrap_or_else(num_cpus::get);
            Box::new(OsThreadPool::new(size))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{HdrMetricsSink, Outcome};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    struct ConstantPattern {
        tps: f64,
        duration: Duration,
    }

    impl LoadPattern for ConstantPattern {
        fn tps(&self, _elapsed: Duration) -> f64 {
            self.tps
        }
        fn duration(&self) -> Duration {
            self.duration
        }
    }

    struct CountingTask {
        executions: Arc<AtomicU64>,
        init_calls: Arc<AtomicU64>,
        teardown_calls: Arc<AtomicU64>,
    }

    #[async_trait]
    impl Task for CountingTask {
        async fn init(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn execute(&self, _iteration: u64) -> Outcome {
            self.executions.fetch_add(1, Ordering::SeqCst);
            Outcome::Success
        }

        async fn teardown(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.teardown_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingInitTask {
        executions: Arc<AtomicU64>,
        teardown_calls: Arc<AtomicU64>,
    }

    #[async_trait]
    impl Task for FailingInitTask {
        async fn init(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Err("init exploded".into())
        }

        async fn execute(&self, _iteration: u64) -> Outcome {
            self.executions.fetch_add(1, Ordering::SeqCst);
            Outcome::Success
        }

        async fn teardown(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.teardown_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn runs_to_completion_and_tears_down_exactly_once() {
        let executions = Arc::new(AtomicU64::new(0));
        let init_calls = Arc::new(AtomicU64::new(0));
        let teardown_calls = Arc::new(AtomicU64::new(0));
        let task = Arc::new(CountingTask {
            executions: Arc::clone(&executions),
            init_calls: Arc::clone(&init_calls),
            teardown_calls: Arc::clone(&teardown_calls),
        });
        let metrics: Arc<dyn MetricsSink> = Arc::new(HdrMetricsSink::default());

        let engine = ExecutionEngineBuilder::new()
            .with_task(task)
            .with_pattern(ConstantPattern {
                tps: 200.0,
                duration: Duration::from_millis(150),
            })
            .with_metrics(Arc::clone(&metrics))
            .with_shutdown_hook(false)
            .build()
            .expect("valid builder inputs");

        engine.run().await.expect("run should succeed");

        assert_eq!(init_calls.load(Ordering::SeqCst), 1);
        assert_eq!(teardown_calls.load(Ordering::SeqCst), 1);
        assert!(executions.load(Ordering::SeqCst) >= 1);
        assert_eq!(metrics.total_executions(), executions.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn init_failure_skips_dispatch_and_teardown() {
        let executions = Arc::new(AtomicU64::new(0));
        let teardown_calls = Arc::new(AtomicU64::new(0));
        let task = Arc::new(FailingInitTask {
            executions: Arc::clone(&executions),
            teardown_calls: Arc::clone(&teardown_calls),
        });
        let metrics: Arc<dyn MetricsSink> = Arc::new(HdrMetricsSink::default());

        let engine = ExecutionEngineBuilder::new()
            .with_task(task)
            .with_pattern(ConstantPattern {
                tps: 200.0,
                duration: Duration::from_secs(1),
            })
            .with_metrics(metrics)
            .with_shutdown_hook(false)
            .build()
            .expect("valid builder inputs");

        let result = engine.run().await;
        assert!(matches!(result, Err(RunError::Init(EngineError::TaskInitFailed(_)))));
        assert_eq!(executions.load(Ordering::SeqCst), 0);
        assert_eq!(teardown_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stop_handle_halts_the_dispatch_loop_promptly() {
        let executions = Arc::new(AtomicU64::new(0));
        let init_calls = Arc::new(AtomicU64::new(0));
        let teardown_calls = Arc::new(AtomicU64::new(0));
        let task = Arc::new(CountingTask {
            executions: Arc::clone(&executions),
            init_calls,
            teardown_calls,
        });
        let metrics: Arc<dyn MetricsSink> = Arc::new(HdrMetricsSink::default());

        let engine = Arc::new(
            ExecutionEngineBuilder::new()
                .with_task(task)
                .with_pattern(ConstantPattern {
                    tps: 500.0,
                    duration: Duration::from_secs(30),
                })
                .with_metrics(metrics)
                .with_shutdown_hook(false)
                .build()
                .expect("valid builder inputs"),
        );

        let handle = engine.handle();
        let engine_clone = Arc::clone(&engine);
        let run_task = tokio::spawn(async move { engine_clone.run().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop();

        let result = tokio::time::timeout(Duration::from_secs(2), run_task)
            .await
            .expect("engine should stop within the timeout")
            .expect("run task should not panic");
        assert!(result.is_ok());
    }
}
