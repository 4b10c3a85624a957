//! Process-wide termination signal wiring, plus isolated-timeout execution for the
//! shutdown-callback phase so one hung callback can't deadlock the rest of shutdown.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{ShutdownCallbackFailure, ShutdownFailureKind};

/// A shutdown-phase side effect (e.g. flushing metrics to a sink). Boxed and `Fn`
/// rather than `FnOnce` so the same callback could in principle be registered more than
/// once; the engine only ever calls it once per `run()`.
pub type ShutdownCallback = Arc<
    dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>> + Send>>
        + Send
        + Sync,
>;

/// Waits for `SIGINT`/`Ctrl-C` (and, on Unix, `SIGTERM`) and sets `stop_flag`. Runs until
/// the flag is already set by some other path (e.g. the caller's own `stop()`), at which
/// point it exits without ever having seen a signal.
pub async fn run_signal_hook(stop_flag: Arc<AtomicBool>) {
    #[cfg(unix)]
    {
        let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(%err, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT, requesting graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::info!("received SIGTERM, requesting graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received Ctrl-C, requesting graceful shutdown");
        }
    }
    stop_flag.store(true, Ordering::Release);
}

/// Runs `callback` on its own task and races it against `timeout`, so a callback that
/// never returns (or panics) cannot block the rest of the shutdown sequence. Returns
/// `None` on success, or the recorded failure otherwise.
pub async fn run_shutdown_callback(
    label: &str,
    callback: ShutdownCallback,
    timeout: Duration,
) -> Option<ShutdownCallbackFailure> {
    let started = Instant::now();
    let join = tokio::spawn(async move { callback().await });

    match tokio::time::timeout(timeout, join).await {
        Ok(Ok(Ok(()))) => None,
        Ok(Ok(Err(err))) => {
            tracing::warn!(callback = label, error = %err, "shutdown callback failed");
            Some(ShutdownCallbackFailure {
                label: label.to_string(),
                kind: ShutdownFailureKind::Errored,
                elapsed: started.elapsed(),
            })
        }
        Ok(Err(join_err)) => {
            tracing::warn!(callback = label, error = %join_err, "shutdown callback panicked");
            Some(ShutdownCallbackFailure {
                label: label.to_string(),
                kind: ShutdownFailureKind::Panicked,
                elapsed: started.elapsed(),
            })
        }
        Err(_) => {
            tracing::warn!(callback = label, timeout_secs = timeout.as_secs_f64(), "shutdown callback timed out");
            Some(ShutdownCallbackFailure {
                label: label.to_string(),
                kind: ShutdownFailureKind::TimedOut,
                elapsed: started.elapsed(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_callback() -> ShutdownCallback {
        Arc::new(|| Box::pin(async { Ok(()) }))
    }

    fn failing_callback() -> ShutdownCallback {
        Arc::new(|| Box::pin(async { Err("boom".into()) }))
    }

    fn hanging_callback() -> ShutdownCallback {
        Arc::new(|| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn successful_callback_reports_no_failure() {
        let result = run_shutdown_callback("ok", ok_callback(), Duration::from_secs(1)).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn errored_callback_is_recorded() {
        let result = run_shutdown_callback("errored", failing_callback(), Duration::from_secs(1)).await;
        let failure = result.expect("expected a recorded failure");
        assert_eq!(failure.kind, ShutdownFailureKind::Errored);
        assert_eq!(failure.label, "errored");
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_callback_times_out() {
        let result = run_shutdown_callback("hangs", hanging_callback(), Duration::from_millis(50)).await;
        let failure = result.expect("expected a timeout failure");
        assert_eq!(failure.kind, ShutdownFailureKind::TimedOut);
    }
}
