//! The two worker-pool shapes a [`Task`](super::task::Task) can request: one lightweight
//! async task per dispatch, or a fixed pool of OS threads. Both satisfy the same
//! `WorkerPool` trait so [`crate::engine::ExecutionEngine`] is generic over the choice.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crossbeam_channel::{bounded, Receiver, Sender};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

/// One unit of submitted work: run to completion, produce no result the pool cares about
/// (the job closure itself threads outcomes back through `MetricsSink`).
pub type BoxedJob = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Owned by [`crate::engine::ExecutionEngine`]; only the engine submits, and only during
/// the dispatch loop, per the concurrency model's shared-resource policy.
#[async_trait]
pub trait WorkerPool: Send + Sync {
    async fn submit(&self, job: BoxedJob);

    /// Stops accepting new work conceptually (callers must stop calling `submit`) and
    /// waits up to `timeout` for in-flight jobs to finish. Returns `true` if everything
    /// drained before the deadline.
    async fn drain(&self, timeout: Duration) -> bool;

    /// Best-effort cancellation of whatever is still outstanding after a failed drain.
    async fn force_cancel(&self, timeout: Duration);
}

/// One `tokio::task::spawn` per dispatch, bounded by a semaphore so an overloaded
/// system-under-test cannot cause unbounded task growth.
pub struct LightweightPool {
    semaphore: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
}

impl LightweightPool {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_in_flight.max(1))),
            tasks: Mutex::new(JoinSet::new()),
        }
    }
}

#[async_trait]
impl WorkerPool for LightweightPool {
    async fn submit(&self, job: BoxedJob) {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("worker pool semaphore never closes while the pool is alive");
        let mut tasks = self.tasks.lock().await;
        tasks.spawn(async move {
            job.await;
            drop(permit);
        });
    }

    async fn drain(&self, timeout: Duration) -> bool {
        let mut tasks = self.tasks.lock().await;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tasks.is_empty() {
                return true;
            }
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(_)) => continue,
                Ok(None) => return true,
                Err(_) => return false,
            }
        }
    }

    async fn force_cancel(&self, timeout: Duration) {
        let mut tasks = self.tasks.lock().await;
        tasks.abort_all();
        let deadline = tokio::time::Instant::now() + timeout;
        while !tasks.is_empty() {
            if tokio::time::timeout_at(deadline, tasks.join_next())
                .await
                .is_err()
            {
                break;
            }
        }
    }
}

/// A fixed set of OS threads, each running its own single-threaded Tokio runtime and
/// pulling boxed jobs off a `crossbeam_channel`. Used for tasks whose `execute` body
/// does blocking work that would starve a shared lightweight-task runtime.
pub struct OsThreadPool {
    sender: Option<Sender<BoxedJob>>,
    handles: std::sync::Mutex<Vec<std::thread::JoinHandle<()>>>,
    outstanding: Arc<AtomicUsize>,
}

impl OsThreadPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (sender, receiver): (Sender<BoxedJob>, Receiver<BoxedJob>) = bounded(size * 4);
        let outstanding = Arc::new(AtomicUsize::new(0));
        let handles = (0..size)
            .map(|worker_id| {
                let receiver = receiver.clone();
                let outstanding = Arc::clone(&outstanding);
                std::thread::Builder::new()
                    .name(format!("ramp-worker-{worker_id}"))
                    .spawn(move || worker_loop(receiver, outstanding))
                    .expect("failed to spawn OS thread pool worker")
            })
            .collect();
        Self {
            sender: Some(sender),
            handles: std::sync::Mutex::new(handles),
            outstanding,
        }
    }
}

fn worker_loop(receiver: Receiver<BoxedJob>, outstanding: Arc<AtomicUsize>) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("failed to build per-worker current-thread runtime");
    while let Ok(job) = receiver.recv() {
        rt.block_on(job);
        outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl WorkerPool for OsThreadPool {
    async fn submit(&self, job: BoxedJob) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        let sender = self
            .sender
            .clone()
            .expect("submit called after the OS thread pool was dropped");
        // crossbeam's blocking send would stall the async dispatch loop if the bounded
        // queue is full; hand it to a blocking thread so back-pressure lands on the
        // dispatch loop without freezing the whole Tokio runtime.
        let job = tokio::task::spawn_blocking(move || sender.send(job))
            .await
            .expect("submit thread panicked");
        if job.is_err() {
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
            tracing::error!("OS thread pool workers have all exited; dropping job");
        }
    }

    async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.outstanding.load(Ordering::Acquire) > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }

    async fn force_cancel(&self, timeout: Duration) {
        // OS threads can't be preempted mid-job; the best we can do is stop waiting.
        // Outstanding jobs keep running in the background and are abandoned once the
        // timeout elapses — they no longer block shutdown, but they are not killed.
        let drained = self.drain(timeout).await;
        if !drained {
            tracing::warn!("OS thread pool force_cancel timed out with jobs still running");
        }
    }
}

impl Drop for OsThreadPool {
    fn drop(&mut self) {
        let handles = std::mem::take(&mut *self.handles.lock().expect("handles lock poisoned"));
        self.sender.take(); // closes the channel so worker threads exit their recv loop
        for handle in handles {
            let _ = handle.join();
        }
    }
}
