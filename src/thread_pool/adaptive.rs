use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{debug, error};

use super::queue::{JobQueue, Pop};
use super::worker::{execute, join_worker, spawn_worker};
use super::{lock, Job, PoolState, ThreadPool};
use crate::config::{AdaptiveConfig, GroupConfig};
use crate::error::TryAddError;
use crate::{Error, Result};

/// An adaptive pool never shrinks below this many workers.
const MIN_WORKERS: usize = 1;

/// Worker threads of an adaptive pool.
///
/// Every change to `live` happens under this struct's mutex, which
/// serializes growth, retirement and shutdown.
struct WorkerSet {
    handles: HashMap<usize, JoinHandle<()>>,
    /// Workers that retired and are waiting to be joined.
    retired: Vec<usize>,
    live: usize,
    next_id: usize,
}

/// What the controller looks at on each tick.
#[derive(Debug, Clone, Copy)]
struct LoadSample {
    queued: usize,
    live: usize,
    busy: usize,
}

impl LoadSample {
    /// Work is waiting and nobody is free to take it.
    fn under_pressure(&self) -> bool {
        self.queued > 0 && self.busy >= self.live
    }
}

struct Shared {
    label: String,
    queue: JobQueue,
    tuning: AdaptiveConfig,
    max_workers: usize,
    workers: Mutex<WorkerSet>,
    busy: AtomicUsize,
}

impl Shared {
    /// Starts one more worker unless stopping or at the maximum.
    fn grow(self: &Arc<Self>, set: &mut WorkerSet) -> io::Result<bool> {
        if !self.queue.running() || set.live >= self.max_workers {
            return Ok(false);
        }
        let id = set.next_id;
        let shared = self.clone();
        let handle = spawn_worker(&self.label, id, move || shared.run_worker(id))?;
        set.next_id += 1;
        set.live += 1;
        set.handles.insert(id, handle);
        Ok(true)
    }

    fn run_worker(&self, id: usize) {
        loop {
            match self.queue.pop_timeout(self.tuning.idle_timeout()) {
                Pop::Job(job) => {
                    self.busy.fetch_add(1, Ordering::SeqCst);
                    execute(&self.label, id, job);
                    self.busy.fetch_sub(1, Ordering::SeqCst);
                    self.queue.finish_one();
                }
                Pop::Idle => {
                    if self.try_retire(id) {
                        debug!("Worker {}-{}: idle, retiring", self.label, id);
                        return;
                    }
                }
                Pop::Shutdown => {
                    lock(&self.workers).live -= 1;
                    debug!("Worker {}-{}: queue closed, shutting down", self.label, id);
                    return;
                }
            }
        }
    }

    /// Removes an idle worker from the live count if above the floor.
    fn try_retire(&self, id: usize) -> bool {
        let mut set = lock(&self.workers);
        if !self.queue.running() || set.live <= MIN_WORKERS {
            return false;
        }
        set.live -= 1;
        set.retired.push(id);
        true
    }

    fn sample(&self) -> LoadSample {
        let live = lock(&self.workers).live;
        LoadSample {
            queued: self.queue.len(),
            live,
            busy: self.busy.load(Ordering::SeqCst),
        }
    }

    /// Joins workers that retired since the last call.
    fn reap_retired(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = lock(&self.workers);
            let WorkerSet {
                handles, retired, ..
            } = &mut *guard;
            retired.drain(..).filter_map(|id| handles.remove(&id)).collect()
        };
        for handle in handles {
            join_worker(&self.label, handle);
        }
    }
}

/// Controller loop: grows the pool under sustained pressure until the
/// shutdown channel disconnects.
fn control(shared: Arc<Shared>, shutdown: Receiver<()>) {
    let debounce = shared.tuning.grow_debounce();
    let mut pressure_since: Option<Instant> = None;

    loop {
        match shutdown.recv_timeout(shared.tuning.sample_interval()) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        shared.reap_retired();

        let sample = shared.sample();
        if !sample.under_pressure() {
            pressure_since = None;
            continue;
        }
        let since = *pressure_since.get_or_insert_with(Instant::now);
        if since.elapsed() < debounce {
            continue;
        }

        let mut set = lock(&shared.workers);
        match shared.grow(&mut set) {
            Ok(true) => debug!(
                "Pool {}: {} queued, {} busy, grew to {} workers",
                shared.label, sample.queued, sample.busy, set.live
            ),
            Ok(false) => {}
            Err(e) => error!("Pool {}: failed to add worker: {}", shared.label, e),
        }
        pressure_since = None;
    }
    debug!("Pool {}: controller exiting", shared.label);
}

/// A thread pool that starts with one worker and adds or retires
/// workers as the queue fills and drains.
pub(crate) struct AdaptivePool {
    shared: Arc<Shared>,
    controller: Mutex<Option<JoinHandle<()>>>,
    /// Dropped on stop to wake the controller.
    shutdown_tx: Mutex<Option<Sender<()>>>,
    /// Serializes `wait` callers.
    join_lock: Mutex<()>,
}

impl AdaptivePool {
    pub(crate) fn new(config: &GroupConfig) -> Result<Self> {
        let label = config.label_or_default().to_owned();
        let shared = Arc::new(Shared {
            queue: JobQueue::new(config.max_queue_len, config.shutdown),
            tuning: config.adaptive.clone(),
            max_workers: config.workers,
            workers: Mutex::new(WorkerSet {
                handles: HashMap::new(),
                retired: Vec::new(),
                live: 0,
                next_id: 0,
            }),
            busy: AtomicUsize::new(0),
            label: label.clone(),
        });
        let (shutdown_tx, shutdown_rx) = channel::bounded(1);
        let pool = AdaptivePool {
            shared,
            controller: Mutex::new(None),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            join_lock: Mutex::new(()),
        };

        // Any early return below drops `pool`, which stops and joins
        // whatever was started.
        {
            let mut set = lock(&pool.shared.workers);
            pool.shared.grow(&mut set).map_err(|e| {
                error!("Failed to start worker {}-0: {}", label, e);
                Error::Spawn(e)
            })?;
        }

        let shared = pool.shared.clone();
        let controller = thread::Builder::new()
            .name(format!("{label}-ctl"))
            .spawn(move || control(shared, shutdown_rx))
            .map_err(|e| {
                error!("Failed to start controller for {}: {}", label, e);
                Error::Spawn(e)
            })?;
        *lock(&pool.controller) = Some(controller);

        debug!(
            "Adaptive pool {} started, up to {} workers",
            label, config.workers
        );
        Ok(pool)
    }
}

impl ThreadPool for AdaptivePool {
    fn try_add_job(&self, job: Job) -> std::result::Result<(), TryAddError> {
        self.shared.queue.push(job)
    }

    fn stop(&self) {
        let backlog = {
            let _set = lock(&self.shared.workers);
            self.shared.queue.close()
        };
        // Discarded jobs run their captures' destructors, which may call
        // back into the pool, so no pool lock is held here.
        if let Some(backlog) = backlog {
            lock(&self.shutdown_tx).take();
            debug!("Adaptive pool {} stopping", self.shared.label);
            self.shared.queue.discard(backlog);
        }
    }

    fn wait(&self) {
        let _join = lock(&self.join_lock);

        let controller = lock(&self.controller).take();
        if let Some(handle) = controller {
            join_worker(&self.shared.label, handle);
        }

        // The controller is gone, so no new workers can appear.
        loop {
            let handles: Vec<JoinHandle<()>> = {
                let mut set = lock(&self.shared.workers);
                set.retired.clear();
                set.handles.drain().map(|(_, handle)| handle).collect()
            };
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                join_worker(&self.shared.label, handle);
            }
        }

        if !self.shared.queue.running() {
            self.shared.queue.mark_stopped();
        }
    }

    fn wait_idle(&self) {
        self.shared.queue.wait_idle();
    }

    fn state(&self) -> PoolState {
        self.shared.queue.state()
    }

    fn queue_size(&self) -> usize {
        self.shared.queue.len()
    }

    fn worker_count(&self) -> usize {
        lock(&self.shared.workers).live
    }
}

impl Drop for AdaptivePool {
    fn drop(&mut self) {
        self.stop();
        self.wait();
    }
}
