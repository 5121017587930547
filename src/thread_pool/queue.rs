use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::debug;

use super::{lock, Job, PoolState};
use crate::config::ShutdownPolicy;
use crate::error::TryAddError;

/// Outcome of waiting for a job with a deadline.
pub(crate) enum Pop {
    /// The oldest pending job.
    Job(Job),
    /// Nothing arrived within the idle timeout.
    Idle,
    /// The queue is closed and drained.
    Shutdown,
}

/// Producer side of the queue. Its state and sender change together.
struct Inlet {
    state: PoolState,
    tx: Option<Sender<Job>>,
}

/// FIFO of pending jobs shared by every producer and every worker.
///
/// Closing the queue drops its only sender, which wakes every worker
/// blocked in `pop`; they see the channel disconnect once it is empty.
pub(crate) struct JobQueue {
    inlet: Mutex<Inlet>,
    rx: Receiver<Job>,
    /// `None` for unbounded. Checked under the inlet lock, so concurrent
    /// pushes cannot overshoot it.
    capacity: Option<usize>,
    policy: ShutdownPolicy,
    /// Accepted jobs that have not yet finished or been discarded.
    pending: AtomicUsize,
    idle_lock: Mutex<()>,
    idle: Condvar,
}

impl JobQueue {
    pub(crate) fn new(max_queue_len: Option<usize>, policy: ShutdownPolicy) -> Self {
        // Bounded crossbeam channels allocate every slot up front.
        let (tx, rx) = channel::unbounded();
        JobQueue {
            inlet: Mutex::new(Inlet {
                state: PoolState::Running,
                tx: Some(tx),
            }),
            rx,
            capacity: max_queue_len,
            policy,
            pending: AtomicUsize::new(0),
            idle_lock: Mutex::new(()),
            idle: Condvar::new(),
        }
    }

    /// Appends a job if the queue is running and below capacity.
    pub(crate) fn push(&self, job: Job) -> Result<(), TryAddError> {
        let inlet = lock(&self.inlet);
        let tx = match (inlet.state, inlet.tx.as_ref()) {
            (PoolState::Running, Some(tx)) => tx,
            _ => return Err(TryAddError::Stopped(job)),
        };
        if self.capacity.is_some_and(|cap| self.rx.len() >= cap) {
            return Err(TryAddError::Full(job));
        }

        // Counted before the send: a worker may finish the job before
        // `try_send` even returns.
        self.pending.fetch_add(1, Ordering::SeqCst);
        // Unbounded and our own receiver is alive, so only a closed
        // channel can refuse the job.
        tx.try_send(job).map_err(|err| {
            self.finish_one();
            TryAddError::Stopped(err.into_inner())
        })
    }

    /// Takes the oldest job, blocking while the queue is empty and running.
    ///
    /// Returns `None` once the queue has been closed and drained.
    pub(crate) fn pop(&self) -> Option<Job> {
        loop {
            let job = self.rx.recv().ok()?;
            if let Some(job) = self.admit(job) {
                return Some(job);
            }
        }
    }

    /// Like [`pop`](Self::pop), giving up after `idle` without a job.
    pub(crate) fn pop_timeout(&self, idle: Duration) -> Pop {
        loop {
            match self.rx.recv_timeout(idle) {
                Ok(job) => {
                    if let Some(job) = self.admit(job) {
                        return Pop::Job(job);
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Pop::Idle,
                Err(RecvTimeoutError::Disconnected) => return Pop::Shutdown,
            }
        }
    }

    /// Discards a freshly dequeued job when the pool is abandoning its
    /// backlog. The state is re-checked after every wakeup.
    fn admit(&self, job: Job) -> Option<Job> {
        if self.policy == ShutdownPolicy::Abandon && !self.running() {
            drop(job);
            self.finish_one();
            return None;
        }
        Some(job)
    }

    /// Stops accepting jobs and wakes all workers.
    ///
    /// Returns `None` if the queue was already closed. Otherwise returns
    /// the backlog taken out under [`ShutdownPolicy::Abandon`] (empty when
    /// draining); pass it to [`discard`](Self::discard) once no pool lock
    /// is held, since dropping a job runs the destructors of its captures.
    pub(crate) fn close(&self) -> Option<Vec<Job>> {
        let mut inlet = lock(&self.inlet);
        if inlet.state != PoolState::Running {
            return None;
        }
        inlet.state = PoolState::Stopping;
        inlet.tx = None;
        drop(inlet);

        match self.policy {
            ShutdownPolicy::Abandon => Some(self.rx.try_iter().collect()),
            ShutdownPolicy::Drain => Some(Vec::new()),
        }
    }

    /// Drops jobs taken out by [`close`](Self::close) without running them.
    pub(crate) fn discard(&self, backlog: Vec<Job>) {
        if backlog.is_empty() {
            return;
        }
        let discarded = backlog.len();
        for job in backlog {
            drop(job);
            self.finish_one();
        }
        debug!("Discarded {} queued jobs", discarded);
    }

    /// Records that every worker has been joined.
    pub(crate) fn mark_stopped(&self) {
        lock(&self.inlet).state = PoolState::Stopped;
    }

    pub(crate) fn state(&self) -> PoolState {
        lock(&self.inlet).state
    }

    pub(crate) fn running(&self) -> bool {
        self.state() == PoolState::Running
    }

    /// Snapshot of the number of queued jobs.
    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }

    /// Marks one accepted job as finished or discarded.
    pub(crate) fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _guard = lock(&self.idle_lock);
            self.idle.notify_all();
        }
    }

    /// Blocks until no accepted job is queued or running.
    pub(crate) fn wait_idle(&self) {
        let mut guard = lock(&self.idle_lock);
        while self.pending.load(Ordering::SeqCst) > 0 {
            guard = self
                .idle
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn noop() -> Job {
        Box::new(|| {})
    }

    #[test]
    fn pops_in_push_order() {
        let queue = JobQueue::new(None, ShutdownPolicy::Drain);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = order.clone();
            queue
                .push(Box::new(move || order.lock().unwrap().push(i)))
                .unwrap();
        }
        assert_eq!(queue.len(), 5);
        for _ in 0..5 {
            let job = queue.pop().unwrap();
            job();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn full_queue_hands_job_back() {
        let queue = JobQueue::new(Some(2), ShutdownPolicy::Drain);
        assert!(queue.push(noop()).is_ok());
        assert!(queue.push(noop()).is_ok());
        let err = queue.push(noop()).unwrap_err();
        assert!(err.is_full());
        assert_eq!(queue.len(), 2);

        let _ = queue.pop().unwrap();
        assert!(queue.push(noop()).is_ok());
    }

    #[test]
    fn huge_capacity_is_not_preallocated() {
        for cap in [usize::MAX, 1 << 28] {
            let queue = JobQueue::new(Some(cap), ShutdownPolicy::Drain);
            for _ in 0..100 {
                queue.push(noop()).unwrap();
            }
            assert_eq!(queue.len(), 100);
        }
    }

    #[test]
    fn capacity_holds_under_concurrent_pushes() {
        let queue = Arc::new(JobQueue::new(Some(16), ShutdownPolicy::Drain));
        let pushers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || (0..100).filter(|_| queue.push(noop()).is_ok()).count())
            })
            .collect();
        let accepted: usize = pushers.into_iter().map(|p| p.join().unwrap()).sum();
        assert_eq!(accepted, 16);
        assert_eq!(queue.len(), 16);
    }

    #[test]
    fn closed_queue_rejects_and_drains() {
        let queue = JobQueue::new(None, ShutdownPolicy::Drain);
        queue.push(noop()).unwrap();
        let backlog = queue.close().unwrap();
        assert!(backlog.is_empty());
        assert!(queue.close().is_none());
        assert_eq!(queue.state(), PoolState::Stopping);

        assert!(queue.push(noop()).unwrap_err().is_stopped());
        assert!(queue.pop().is_some());
        assert!(queue.pop().is_none());
    }

    #[test]
    fn abandon_discards_backlog() {
        let queue = JobQueue::new(None, ShutdownPolicy::Abandon);
        for _ in 0..3 {
            queue.push(noop()).unwrap();
        }
        let backlog = queue.close().unwrap();
        assert_eq!(backlog.len(), 3);
        assert_eq!(queue.len(), 0);
        assert!(queue.pop().is_none());
        queue.discard(backlog);
        // Discarded jobs no longer count as pending.
        queue.wait_idle();
    }

    #[test]
    fn pop_timeout_reports_idle_then_shutdown() {
        let queue = JobQueue::new(None, ShutdownPolicy::Drain);
        assert!(matches!(
            queue.pop_timeout(Duration::from_millis(10)),
            Pop::Idle
        ));
        queue.close();
        assert!(matches!(
            queue.pop_timeout(Duration::from_secs(10)),
            Pop::Shutdown
        ));
    }

    #[test]
    fn close_wakes_blocked_pop() {
        let queue = Arc::new(JobQueue::new(None, ShutdownPolicy::Drain));
        let popper = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop().is_none())
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(popper.join().unwrap());
    }

    #[test]
    fn wait_idle_tracks_pending_jobs() {
        let queue = Arc::new(JobQueue::new(None, ShutdownPolicy::Drain));
        queue.push(noop()).unwrap();
        queue.push(noop()).unwrap();

        let worker = {
            let queue = queue.clone();
            thread::spawn(move || {
                for _ in 0..2 {
                    let job = queue.pop().unwrap();
                    thread::sleep(Duration::from_millis(10));
                    job();
                    queue.finish_one();
                }
            })
        };
        queue.wait_idle();
        assert_eq!(queue.len(), 0);
        worker.join().unwrap();
    }
}
