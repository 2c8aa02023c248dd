//! The two worker pools (IO and CPU) and the manager that owns them.
mod cpu;
mod io;
mod manager;

use crate::prelude::*;
use crate::types::{panic_message, ExecutorError};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

pub use cpu::CpuPool;
pub use io::IoPool;
pub use manager::ExecutorManager;

/// Unit of work accepted by an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Executors are shared between actions, the scheduler and the application.
pub type SharedExecutor = Arc<dyn Executor>;

/// A pool of worker threads that jobs can be submitted to.
pub trait Executor: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Queue `job` for execution. Fails with [`ExecutorError::Rejected`] once the executor has
    /// been shut down; in that case `job` is dropped without running.
    fn execute(&self, job: Job) -> Result<(), ExecutorError>;

    /// Stop accepting new jobs. Jobs that were already queued still run.
    fn shutdown(&self);

    fn is_shutdown(&self) -> bool;
}

/// Runs a job, making sure a panic does not unwind into the worker thread.
pub(crate) fn run_guarded(pool: &str, job: Job) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
        error!("job on {} panicked: {}", pool, panic_message(&*payload));
    }
}
