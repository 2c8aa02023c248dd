use super::{CpuPool, Executor, IoPool, SharedExecutor};
use crate::api::{Action, ActionResult, ResultedAction};
use crate::prelude::*;
use crate::types::{ActionError, ExecutorConfig, ExecutorError, ExecutorKind};
use conduit_core::util::Future;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct Pools {
    io: SharedExecutor,
    cpu: SharedExecutor,
}

/// Owner of the IO pool and the CPU pool.
///
/// The manager is constructed by the application root and handed by reference to whatever
/// needs to run work; there is no global instance. The pools are created once by
/// [`initialize`](Self::initialize) and torn down once by [`shutdown`](Self::shutdown). A manager
/// that has been shut down can not be brought back.
#[derive(Debug, Default)]
pub struct ExecutorManager {
    pools: OnceCell<Pools>,
    shutdown: AtomicBool,
}

impl ExecutorManager {
    pub fn new() -> Self {
        default()
    }

    /// Creates both pools. Calling this again after a successful initialization does nothing.
    pub fn initialize(&self, config: &ExecutorConfig) -> Result<(), ExecutorError> {
        self.install(|| {
            let io = IoPool::new(&config.io);
            let cpu = CpuPool::new(&config.cpu)?;

            Ok(Pools {
                io: Arc::new(io),
                cpu: Arc::new(cpu),
            })
        })
    }

    /// Initializes the manager with externally constructed pools, for example to control the
    /// number of threads in tests. Has no effect if the manager was already initialized.
    pub fn initialize_with(
        &self,
        io: SharedExecutor,
        cpu: SharedExecutor,
    ) -> Result<(), ExecutorError> {
        self.install(move || Ok(Pools { io, cpu }))
    }

    fn install<F>(&self, create: F) -> Result<(), ExecutorError>
    where
        F: FnOnce() -> Result<Pools, ExecutorError>,
    {
        if self.is_shutdown() {
            return Err(ExecutorError::AlreadyShutdown);
        }

        let mut created = false;
        let pools = self.pools.get_or_try_init(|| {
            created = true;
            create()
        })?;

        if !created {
            debug!("executors already initialized, ignoring");
            return Ok(());
        }

        info!(
            "initialized executors (io: {}, cpu: {})",
            pools.io.name(),
            pools.cpu.name()
        );

        // A concurrent `shutdown` may have missed the pools we just created.
        if self.is_shutdown() {
            pools.io.shutdown();
            pools.cpu.shutdown();
            return Err(ExecutorError::AlreadyShutdown);
        }

        Ok(())
    }

    fn pools(&self) -> Result<&Pools, ExecutorError> {
        self.pools.get().ok_or(ExecutorError::Uninitialized)
    }

    /// The pool for blocking work.
    pub fn io(&self) -> Result<SharedExecutor, ExecutorError> {
        Ok(Arc::clone(&self.pools()?.io))
    }

    /// The pool for compute-bound work.
    pub fn cpu(&self) -> Result<SharedExecutor, ExecutorError> {
        Ok(Arc::clone(&self.pools()?.cpu))
    }

    pub fn get(&self, kind: ExecutorKind) -> Result<SharedExecutor, ExecutorError> {
        match kind {
            ExecutorKind::Io => self.io(),
            ExecutorKind::Cpu => self.cpu(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.pools.get().is_some()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Stops both pools from accepting new work; queued work still runs to completion. Safe to
    /// call more than once.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(pools) = self.pools.get() {
            pools.io.shutdown();
            pools.cpu.shutdown();
        }

        info!("executors shut down");
    }

    /// Runs `work` on the IO pool.
    ///
    /// If the manager has not been initialized the returned action fails immediately.
    pub fn supply_async<T, F>(&self, work: F) -> Action<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        match self.io() {
            Ok(executor) => Action::supply_async(&*executor, work),
            Err(e) => Action::failed(e),
        }
    }

    /// Runs a side effect on the IO pool.
    pub fn run_async<F>(&self, work: F) -> Action<()>
    where
        F: FnOnce() + Send + 'static,
    {
        match self.io() {
            Ok(executor) => Action::run_async(&*executor, work),
            Err(e) => Action::failed(e),
        }
    }

    /// Runs `work` on the IO pool, reifying every outcome into an [`ActionResult`].
    pub fn supply_resulted<T, F>(&self, work: F) -> ResultedAction<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        match self.io() {
            Ok(executor) => ResultedAction::supply_async(&*executor, work),
            Err(e) => ResultedAction::completed(ActionResult::failure(e)),
        }
    }

    /// Runs `fun` on the IO pool and returns a plain future for its value.
    pub fn spawn_io<R, F>(&self, fun: F) -> Future<Result<R, ActionError>>
    where
        R: Clone + Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        self.spawn(ExecutorKind::Io, fun)
    }

    /// Runs `fun` on the CPU pool and returns a plain future for its value.
    pub fn spawn_cpu<R, F>(&self, fun: F) -> Future<Result<R, ActionError>>
    where
        R: Clone + Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        self.spawn(ExecutorKind::Cpu, fun)
    }

    fn spawn<R, F>(&self, kind: ExecutorKind, fun: F) -> Future<Result<R, ActionError>>
    where
        R: Clone + Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let action = match self.get(kind) {
            Ok(executor) => Action::supply_async(&*executor, move || Ok(fun())),
            Err(e) => Action::failed(e),
        };

        action.submit()
    }
}
