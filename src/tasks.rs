//! Bounded fire-and-forget background execution.
//!
//! The synchronous device reply must never couple to background work, so
//! enrichment runs through this scheduler: a semaphore caps in-flight
//! tasks, each task gets its own deadline, failures and panics stay inside
//! the task, and shutdown cancels whatever is still running after a short
//! drain window.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Default cap on concurrently running background tasks.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

/// Default per-task deadline.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(60);

/// Default drain window granted to in-flight tasks at shutdown.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Scheduling failures. Callers fail open: the foreground reply proceeds.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The concurrency cap is reached; the task was dropped.
    #[error("background scheduler at capacity")]
    Full,
    /// Shutdown has begun; no new tasks are accepted.
    #[error("background scheduler is shutting down")]
    ShuttingDown,
}

/// In-process background task scheduler.
pub struct TaskScheduler {
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    task_timeout: Duration,
    max_in_flight: usize,
    scheduled: AtomicU64,
}

impl TaskScheduler {
    /// Create a scheduler with the given cap and per-task deadline.
    pub fn new(max_in_flight: usize, task_timeout: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_in_flight)),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            task_timeout,
            max_in_flight,
            scheduled: AtomicU64::new(0),
        }
    }

    /// Create a scheduler with the default cap and deadline.
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_MAX_IN_FLIGHT, DEFAULT_TASK_TIMEOUT)
    }

    /// Fire-and-forget a background task.
    ///
    /// The task runs under the scheduler's deadline and is cancelled at
    /// shutdown. Its errors and panics never escape the task.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Full`] at the concurrency cap and
    /// [`SchedulerError::ShuttingDown`] once shutdown has begun. Both are
    /// warnings for the caller, not failures of the foreground path.
    pub fn schedule<F>(&self, name: &'static str, task: F) -> Result<(), SchedulerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(SchedulerError::ShuttingDown);
        }
        let permit = Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .map_err(|_| SchedulerError::Full)?;

        self.scheduled.fetch_add(1, Ordering::Relaxed);
        let deadline = self.task_timeout;
        let cancel = self.cancel.clone();
        // Fire-and-forget: the tracker owns completion, not a join handle.
        let _detached = self.tracker.spawn(async move {
            let _permit = permit;
            tokio::select! {
                () = cancel.cancelled() => {
                    warn!(task = name, "background task cancelled at shutdown");
                }
                outcome = tokio::time::timeout(deadline, task) => match outcome {
                    Ok(()) => debug!(task = name, "background task finished"),
                    Err(_) => warn!(task = name, ?deadline, "background task timed out"),
                },
            }
        });
        Ok(())
    }

    /// Total number of tasks ever accepted. Observable by tests and the
    /// turn-summary logs.
    pub fn scheduled_count(&self) -> u64 {
        self.scheduled.load(Ordering::Relaxed)
    }

    /// Number of tasks currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight
            .saturating_sub(self.semaphore.available_permits())
    }

    /// Cancel in-flight tasks and wait up to `drain` for them to finish.
    /// Tasks still running after the window are abandoned.
    pub async fn shutdown(&self, drain: Duration) {
        self.cancel.cancel();
        self.tracker.close();
        if tokio::time::timeout(drain, self.tracker.wait()).await.is_err() {
            warn!(
                in_flight = self.in_flight(),
                "drain window elapsed; abandoning background tasks"
            );
        }
    }
}
