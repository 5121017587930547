#![deny(missing_docs)]

//! A multithreaded job dispatcher.
//!
//! A [`WorkerGroup`] owns a queue of jobs and a set of worker threads
//! that execute them in submission order. Groups come in two flavours:
//! a fixed number of workers, or a load-adaptive pool that grows while
//! jobs pile up and shrinks again when workers sit idle.

mod config;
mod error;
mod group;
mod handle;
/// Job queue and worker pool implementations backing a [`WorkerGroup`].
pub mod thread_pool;

pub use config::{AdaptiveConfig, GroupConfig, PoolMode, ShutdownPolicy};
pub use error::{Error, JobError, Result, TryAddError};
pub use group::WorkerGroup;
pub use handle::JobHandle;
pub use thread_pool::{Job, PoolState};
