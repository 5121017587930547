use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use log::{debug, error};

use super::Job;

/// Starts a named worker thread running `body`.
pub(super) fn spawn_worker<F>(label: &str, id: usize, body: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let name = format!("{label}-{id}");
    debug!("Starting worker {name}");
    thread::Builder::new().name(name).spawn(body)
}

/// Runs one job, containing any panic so the worker survives it.
pub(super) fn execute(label: &str, id: usize, job: Job) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
        error!(
            "Worker {label}-{id}: job panicked: {}, continuing",
            panic_message(payload.as_ref())
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// Joins a worker thread. Panics are already contained per job, so a
/// failed join means the worker loop itself broke.
///
/// A worker asked to join itself (a job dropped the last reference to
/// its own group) is detached instead; its loop exits once the job
/// returns, since the queue is already closed.
pub(super) fn join_worker(label: &str, handle: JoinHandle<()>) {
    let name = handle.thread().name().unwrap_or(label).to_owned();
    if handle.thread().id() == thread::current().id() {
        debug!("Worker {name} is the caller, not joining itself");
        return;
    }
    if handle.join().is_err() {
        error!("Worker {name} terminated abnormally");
    } else {
        debug!("Worker {name} joined");
    }
}
