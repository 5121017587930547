use crossbeam::channel::{Receiver, TryRecvError};

use crate::error::JobError;

/// The eventual result of a job submitted with [`WorkerGroup::run`].
///
/// Dropping the handle does not affect the job; its result is discarded.
///
/// [`WorkerGroup::run`]: crate::WorkerGroup::run
#[derive(Debug)]
pub struct JobHandle<T> {
    rx: Receiver<T>,
}

impl<T> JobHandle<T> {
    pub(crate) fn new(rx: Receiver<T>) -> Self {
        JobHandle { rx }
    }

    /// Blocks until the job has produced its value.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Lost`] if the job panicked or was discarded at
    /// shutdown.
    pub fn join(self) -> Result<T, JobError> {
        self.rx.recv().map_err(|_| JobError::Lost)
    }

    /// Returns the value if the job has already finished, `None` otherwise.
    pub fn try_join(&self) -> Option<Result<T, JobError>> {
        match self.rx.try_recv() {
            Ok(value) => Some(Ok(value)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(JobError::Lost)),
        }
    }
}
