use super::{run_guarded, Executor, Job};
use crate::prelude::*;
use crate::types::{ExecutorError, PoolConfig};
use std::sync::Arc;
use threadpool::ThreadPool;

/// Pool for blocking work, backed by a fixed-size `threadpool`.
#[derive(Debug)]
pub struct IoPool {
    name: Arc<str>,
    threads: usize,
    pool: Mutex<Option<ThreadPool>>,
}

impl IoPool {
    pub fn new(config: &PoolConfig) -> Self {
        let pool = threadpool::Builder::new()
            .num_threads(config.threads)
            .thread_name(config.thread_name.clone())
            .build();

        debug!(
            "started {} with {} threads",
            config.thread_name, config.threads
        );

        Self {
            name: Arc::from(config.thread_name.as_str()),
            threads: config.threads,
            pool: Mutex::new(Some(pool)),
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Number of jobs waiting for a free thread.
    pub fn queued(&self) -> usize {
        match &*self.pool.lock() {
            Some(pool) => pool.queued_count(),
            None => 0,
        }
    }

    /// Blocks until every queued job has finished. Must not be called from one of this pool's
    /// own threads.
    pub fn join(&self) {
        let pool = self.pool.lock().clone();

        if let Some(pool) = pool {
            pool.join();
        }
    }
}

impl Executor for IoPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, job: Job) -> Result<(), ExecutorError> {
        match &*self.pool.lock() {
            Some(pool) => {
                let name = Arc::clone(&self.name);
                pool.execute(move || run_guarded(&name, job));
                Ok(())
            }
            None => Err(ExecutorError::Rejected {
                pool: self.name.to_string(),
            }),
        }
    }

    fn shutdown(&self) {
        // Dropping the pool closes its queue; the workers drain what is left and exit.
        if let Some(pool) = self.pool.lock().take() {
            info!(
                "shutting down {} ({} jobs still queued)",
                self.name,
                pool.queued_count()
            );
        }
    }

    fn is_shutdown(&self) -> bool {
        self.pool.lock().is_none()
    }
}
