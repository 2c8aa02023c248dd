use super::{run_guarded, Executor, Job};
use crate::prelude::*;
use crate::types::{panic_message, ExecutorError, PoolConfig};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;

/// Pool for compute-bound work, backed by a rayon thread pool.
#[derive(Debug)]
pub struct CpuPool {
    name: Arc<str>,
    threads: usize,
    pool: RwLock<Option<ThreadPool>>,
}

impl CpuPool {
    pub fn new(config: &PoolConfig) -> Result<Self, ExecutorError> {
        let prefix = config.thread_name.clone();
        let handler_name = config.thread_name.clone();

        let pool = ThreadPoolBuilder::new()
            .thread_name(move |i| format!("{}-{}", prefix, i))
            .num_threads(config.threads)
            .panic_handler(move |payload| {
                error!(
                    "worker of {} panicked: {}",
                    handler_name,
                    panic_message(&*payload)
                );
            })
            .build()
            .map_err(|e| ExecutorError::Spawn {
                pool: config.thread_name.clone(),
                reason: e.to_string(),
            })?;

        debug!(
            "started {} with {} threads",
            config.thread_name, config.threads
        );

        Ok(Self {
            name: Arc::from(config.thread_name.as_str()),
            threads: config.threads,
            pool: RwLock::new(Some(pool)),
        })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }
}

impl Executor for CpuPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, job: Job) -> Result<(), ExecutorError> {
        match &*self.pool.read() {
            Some(pool) => {
                let name = Arc::clone(&self.name);
                pool.spawn_fifo(move || run_guarded(&name, job));
                Ok(())
            }
            None => Err(ExecutorError::Rejected {
                pool: self.name.to_string(),
            }),
        }
    }

    fn shutdown(&self) {
        // Dropping a rayon pool lets its threads finish the spawned work before they exit.
        if self.pool.write().take().is_some() {
            info!("shutting down {}", self.name);
        }
    }

    fn is_shutdown(&self) -> bool {
        self.pool.read().is_none()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::mpsc::channel;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_thread_names() {
        let pool = CpuPool::new(&PoolConfig::new(2, "test-cpu")).unwrap();
        let (sender, receiver) = channel();

        pool.execute(Box::new(move || {
            let name = thread::current().name().map(str::to_string);
            sender.send(name).unwrap();
        }))
        .unwrap();

        let name = receiver.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert!(name.starts_with("test-cpu-"), "unexpected name {:?}", name);
        assert_eq!(pool.threads(), 2);
    }

    #[test]
    fn test_panic_is_contained() {
        let pool = CpuPool::new(&PoolConfig::new(1, "test-cpu-panic")).unwrap();
        pool.execute(Box::new(|| panic!("boom"))).unwrap();

        let (sender, receiver) = channel();
        pool.execute(Box::new(move || sender.send(1).unwrap()))
            .unwrap();
        assert_eq!(receiver.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
    }

    #[test]
    fn test_rejects_after_shutdown() {
        let pool = CpuPool::new(&PoolConfig::new(1, "test-cpu-shutdown")).unwrap();
        pool.shutdown();
        pool.shutdown();

        assert!(pool.is_shutdown());
        assert!(matches!(
            pool.execute(Box::new(|| {})),
            Err(ExecutorError::Rejected { .. })
        ));
    }
}
