use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use log::{debug, error};

use super::queue::JobQueue;
use super::worker::{execute, join_worker, spawn_worker};
use super::{lock, Job, PoolState, ThreadPool};
use crate::config::GroupConfig;
use crate::error::TryAddError;
use crate::{Error, Result};

/// A thread pool with a constant number of workers sharing one queue.
pub(crate) struct FixedPool {
    label: String,
    queue: Arc<JobQueue>,
    /// Held for the whole of `wait`, so concurrent waiters all return
    /// only after the last join.
    handles: Mutex<Vec<JoinHandle<()>>>,
    live: Arc<AtomicUsize>,
}

impl FixedPool {
    pub(crate) fn new(config: &GroupConfig) -> Result<Self> {
        let pool = FixedPool {
            label: config.label_or_default().to_owned(),
            queue: Arc::new(JobQueue::new(config.max_queue_len, config.shutdown)),
            handles: Mutex::new(Vec::with_capacity(config.workers)),
            live: Arc::new(AtomicUsize::new(0)),
        };

        for id in 0..config.workers {
            let queue = pool.queue.clone();
            let live = pool.live.clone();
            let label = pool.label.clone();
            live.fetch_add(1, Ordering::SeqCst);
            let handle = match spawn_worker(&pool.label, id, move || {
                run(&label, id, &queue);
                live.fetch_sub(1, Ordering::SeqCst);
            }) {
                Ok(handle) => handle,
                Err(e) => {
                    pool.live.fetch_sub(1, Ordering::SeqCst);
                    error!("Failed to start worker {}-{}: {}", pool.label, id, e);
                    // Dropping the pool stops and joins the workers started so far.
                    return Err(Error::Spawn(e));
                }
            };
            lock(&pool.handles).push(handle);
        }

        debug!("Fixed pool {} started {} workers", pool.label, config.workers);
        Ok(pool)
    }
}

/// Worker loop: run jobs until the queue is closed and drained.
fn run(label: &str, id: usize, queue: &JobQueue) {
    while let Some(job) = queue.pop() {
        execute(label, id, job);
        queue.finish_one();
    }
    debug!("Worker {label}-{id}: queue closed, shutting down");
}

impl ThreadPool for FixedPool {
    fn try_add_job(&self, job: Job) -> std::result::Result<(), TryAddError> {
        self.queue.push(job)
    }

    fn stop(&self) {
        if let Some(backlog) = self.queue.close() {
            debug!("Fixed pool {} stopping", self.label);
            self.queue.discard(backlog);
        }
    }

    fn wait(&self) {
        let mut handles = lock(&self.handles);
        for handle in handles.drain(..) {
            join_worker(&self.label, handle);
        }
        if !self.queue.running() {
            self.queue.mark_stopped();
        }
    }

    fn wait_idle(&self) {
        self.queue.wait_idle();
    }

    fn state(&self) -> PoolState {
        self.queue.state()
    }

    fn queue_size(&self) -> usize {
        self.queue.len()
    }

    fn worker_count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl Drop for FixedPool {
    fn drop(&mut self) {
        self.stop();
        self.wait();
    }
}
