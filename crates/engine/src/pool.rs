//! Shared worker pool the executor dispatches node tasks onto.
//!
//! A thin layer over a Tokio runtime handle: tasks are tracked so shutdown can
//! wait for them, and every task receives a child of the pool's cancellation
//! token so a forced shutdown reaches all of them.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::EngineError;

/// Unbounded task pool shared by every run of an executor (or several
/// executors, behind an `Arc`).
pub struct WorkerPool {
    handle: Handle,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Pool on an explicit runtime.
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Pool on the runtime the caller is running in.
    ///
    /// # Errors
    /// [`EngineError::NoRuntime`] outside of a Tokio runtime.
    pub fn current() -> Result<Self, EngineError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| EngineError::NoRuntime)
    }

    /// Token for one task; cancelled when the pool is force-stopped.
    pub fn child_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Start `task` on the pool.
    ///
    /// # Errors
    /// [`EngineError::PoolShutdown`] once shutdown has begun.
    pub fn spawn<F>(&self, task: F) -> Result<JoinHandle<F::Output>, EngineError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if self.tracker.is_closed() {
            return Err(EngineError::PoolShutdown);
        }
        Ok(self.tracker.spawn_on(task, &self.handle))
    }

    pub fn is_shut_down(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Tasks started and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting work, wait up to `grace` for in-flight tasks, then
    /// cancel whatever is still running.
    ///
    /// Returns `true` when everything finished within the grace period.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        let graceful = tokio::time::timeout(grace, self.tracker.wait()).await.is_ok();
        if graceful {
            info!("worker pool drained");
        } else {
            warn!(
                in_flight = self.tracker.len(),
                ?grace,
                "worker pool did not drain in time; cancelling remaining tasks"
            );
            self.shutdown.cancel();
        }
        graceful
    }
}
