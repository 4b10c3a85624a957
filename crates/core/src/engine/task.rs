//! The contract a load-test user supplies: what runs once per dispatch, plus the
//! thread-affinity hint the engine uses to pick a [`super::worker_pool::WorkerPool`].

use async_trait::async_trait;

pub use crate::metrics::Outcome;

/// Which concurrency shape a [`Task`] wants the engine to run it under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadAffinity {
    /// One lightweight async task per dispatch; bounded by the engine's max-in-flight.
    Lightweight,
    /// A fixed pool of OS threads. `None` resolves to the available core count.
    OsThreadPool(Option<usize>),
}

/// The unit of work an [`crate::engine::ExecutionEngine`] drives.
///
/// `init` runs exactly once before any `execute`, never concurrently with it; `execute`
/// may be called many times concurrently across workers and must be safe for shared use;
/// `teardown` runs exactly once after the last completed execution, even if some
/// `execute` call failed. All three may be skipped `init`/`teardown` bodies (default
/// `Ok(())`) for tasks with no setup/teardown work.
#[async_trait]
pub trait Task: Send + Sync {
    async fn init(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }

    async fn execute(&self, iteration: u64) -> Outcome;

    async fn teardown(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }

    fn thread_affinity(&self) -> ThreadAffinity {
        ThreadAffinity::Lightweight
    }
}
