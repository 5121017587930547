use crossbeam::channel;
use log::debug;

use crate::config::{GroupConfig, PoolMode};
use crate::error::TryAddError;
use crate::handle::JobHandle;
use crate::thread_pool::{AdaptivePool, FixedPool, Job, PoolState, ThreadPool};
use crate::Result;

/// A group of worker threads.
///
/// Jobs can be added at any time and are dispatched, oldest first, to
/// the next available worker. Submission never blocks: when the group is
/// stopped or its queue is full the job is rejected.
///
/// Dropping the group stops it and joins every worker. Whether jobs still
/// queued at that point run is decided by the group's
/// [`ShutdownPolicy`](crate::ShutdownPolicy). If the last owner is one
/// of the group's own jobs, that job's worker is not joined; it exits on
/// its own once the job returns.
pub struct WorkerGroup {
    label: String,
    pool: Box<dyn ThreadPool>,
}

impl WorkerGroup {
    /// Creates a group of exactly `workers` threads.
    ///
    /// `max_queue_len` bounds the number of pending jobs; `None` leaves
    /// the queue unbounded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`](crate::Error::InvalidConfig) for
    /// zero workers or a zero-length queue, and
    /// [`Error::Spawn`](crate::Error::Spawn) if a thread cannot be started.
    pub fn new(label: Option<&str>, workers: usize, max_queue_len: Option<usize>) -> Result<Self> {
        let mut config = GroupConfig::fixed(workers);
        config.label = label.map(str::to_owned);
        config.max_queue_len = max_queue_len;
        Self::with_config(config)
    }

    /// Creates a load-adaptive group of at most `max_workers` threads.
    ///
    /// The group starts with one worker, adds more while jobs pile up and
    /// retires them again once they sit idle.
    pub fn load_adaptive(
        label: Option<&str>,
        max_workers: usize,
        max_queue_len: Option<usize>,
    ) -> Result<Self> {
        let mut config = GroupConfig::adaptive(max_workers);
        config.label = label.map(str::to_owned);
        config.max_queue_len = max_queue_len;
        Self::with_config(config)
    }

    /// Creates a group from a full configuration.
    pub fn with_config(config: GroupConfig) -> Result<Self> {
        config.validate()?;
        let pool: Box<dyn ThreadPool> = match config.mode {
            PoolMode::Fixed => Box::new(FixedPool::new(&config)?),
            PoolMode::Adaptive => Box::new(AdaptivePool::new(&config)?),
        };
        Ok(WorkerGroup {
            label: config.label_or_default().to_owned(),
            pool,
        })
    }

    /// Queues a job. Returns `false` if the group is not running or the
    /// queue is full; the job is dropped in that case.
    pub fn add_job<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.try_add_job(Box::new(job)).is_ok()
    }

    /// Queues a job, handing it back if it was rejected.
    pub fn try_add_job<F>(&self, job: F) -> std::result::Result<(), TryAddError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.try_add_job(Box::new(job))
    }

    /// Queues an already boxed job, such as one handed back by a
    /// [`TryAddError`], without wrapping it again.
    pub fn try_add_boxed(&self, job: Job) -> std::result::Result<(), TryAddError> {
        self.pool.try_add_job(job)
    }

    /// Queues a job whose return value is collected through a [`JobHandle`].
    pub fn run<F, T>(&self, job: F) -> std::result::Result<JobHandle<T>, TryAddError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = channel::bounded(1);
        self.pool.try_add_job(Box::new(move || {
            // The handle may already be gone.
            let _ = tx.send(job());
        }))?;
        Ok(JobHandle::new(rx))
    }

    /// Stops accepting jobs and tells the workers to exit. Does not block.
    pub fn stop(&self) {
        self.pool.stop();
    }

    /// Blocks until every worker has exited. Call [`stop`](Self::stop)
    /// first, otherwise this waits forever.
    pub fn wait(&self) {
        self.pool.wait();
    }

    /// Blocks until every accepted job has finished, leaving the group
    /// running. Must not be called from inside a job.
    pub fn wait_idle(&self) {
        self.pool.wait_idle();
    }

    /// Whether the group accepts new jobs.
    pub fn running(&self) -> bool {
        self.pool.running()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PoolState {
        self.pool.state()
    }

    /// Number of jobs waiting for a worker.
    pub fn queue_size(&self) -> usize {
        self.pool.queue_size()
    }

    /// Number of live worker threads.
    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    /// Name used for this group's threads and log messages.
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for WorkerGroup {
    fn drop(&mut self) {
        if self.running() {
            debug!("Worker group {} dropped while running", self.label);
        }
        self.stop();
        self.wait();
    }
}
