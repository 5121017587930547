use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::TryAddError;

/// A unit of work: runs once on some worker thread, returns nothing.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Lifecycle of a pool. Only `Running` accepts new jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Accepting and executing jobs.
    Running,
    /// `stop()` was called; workers are finishing up.
    Stopping,
    /// Every worker has been joined.
    Stopped,
}

/// A set of worker threads fed from one job queue.
///
/// Implementors are selected when a [`WorkerGroup`](crate::WorkerGroup)
/// is built and are never exposed to its callers.
pub(crate) trait ThreadPool: Send + Sync {
    /// Queues a job without blocking, or hands it back.
    fn try_add_job(&self, job: Job) -> Result<(), TryAddError>;

    /// Begins shutdown. Idempotent and non-blocking.
    fn stop(&self);

    /// Blocks until every worker thread has exited and been joined.
    fn wait(&self);

    /// Blocks until every accepted job has finished or been discarded.
    fn wait_idle(&self);

    /// Current lifecycle state.
    fn state(&self) -> PoolState;

    /// Whether new jobs are accepted.
    fn running(&self) -> bool {
        self.state() == PoolState::Running
    }

    /// Number of jobs waiting for a worker.
    fn queue_size(&self) -> usize;

    /// Number of live worker threads.
    fn worker_count(&self) -> usize;
}

/// Locks a mutex, ignoring poisoning.
///
/// Jobs never run while one of the pool's locks is held, so a poisoned
/// lock cannot hide a half-finished update.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

mod adaptive;
mod fixed;
mod queue;
mod worker;

pub(crate) use self::adaptive::AdaptivePool;
pub(crate) use self::fixed::FixedPool;
