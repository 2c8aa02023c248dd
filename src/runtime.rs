use crate::executor::ExecutorManager;
use crate::prelude::*;
use crate::scheduler::Scheduler;
use crate::types::Config;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Application root: owns the executors and the scheduler that runs on top of them.
///
/// There is meant to be one runtime per process. Components that need to run work get a
/// reference to it (or to its [`ExecutorManager`]) instead of reaching for global state.
#[derive(Debug)]
pub struct Runtime {
    executors: Arc<ExecutorManager>,
    scheduler: Scheduler,
    shutdown: AtomicBool,
}

impl Runtime {
    pub fn start(config: Config) -> Result<Self> {
        let executors = Arc::new(ExecutorManager::new());
        executors
            .initialize(&config.executors)
            .context("failed to initialize executors")?;

        let scheduler = match Scheduler::new(Arc::clone(&executors), &config.scheduler) {
            Ok(scheduler) => scheduler,
            Err(e) => {
                executors.shutdown();
                return Err(Error::new(e).context("failed to start scheduler"));
            }
        };

        info!(
            "runtime started on {} (io: {} threads, cpu: {} threads)",
            hostname(),
            config.executors.io.threads,
            config.executors.cpu.threads
        );

        Ok(Self {
            executors,
            scheduler,
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn executors(&self) -> &Arc<ExecutorManager> {
        &self.executors
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Cancels all tasks, then shuts down the pools. Work already queued on the pools still
    /// runs. Calling this more than once has no further effect.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        self.scheduler.shutdown_all();
        self.executors.shutdown();
        info!("runtime shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::ActionResult;
    use crate::types::{ExecutorConfig, PoolConfig, SchedulerConfig};
    use std::sync::mpsc::channel;
    use std::time::Duration;

    fn config(name: &str) -> Config {
        Config::new(
            ExecutorConfig {
                io: PoolConfig::new(2, format!("{}-io", name)),
                cpu: PoolConfig::new(2, format!("{}-cpu", name)),
            },
            SchedulerConfig {
                timer_thread_name: format!("{}-timer", name),
            },
        )
    }

    #[test]
    fn test_pipeline() {
        let runtime = Runtime::start(config("rt-pipeline")).unwrap();
        let cpu = runtime.executors().cpu().unwrap();
        let io = runtime.executors().io().unwrap();

        let result = runtime
            .executors()
            .supply_resulted(|| Ok(vec![3, 1, 2]))
            .on_executor(cpu)
            .map(|mut values| {
                values.sort_unstable();
                values
            })
            .on_executor(io)
            .try_map(|values| {
                if values.is_empty() {
                    bail!("nothing to store");
                }
                Ok(values.len())
            })
            .complete();

        assert!(matches!(result, ActionResult::Success(3)));
        result.report("pipeline");
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let runtime = Runtime::start(config("rt-shutdown")).unwrap();
        let (sender, receiver) = channel();

        let task = runtime
            .scheduler()
            .run_repeating_async(
                move || {
                    let _ = sender.send(());
                },
                Duration::from_millis(0),
                Duration::from_millis(10),
            )
            .unwrap();
        receiver.recv_timeout(Duration::from_secs(5)).unwrap();

        runtime.shutdown();
        runtime.shutdown();

        assert!(runtime.is_shutdown());
        assert!(task.is_cancelled());
        assert!(runtime.executors().is_shutdown());
        assert!(runtime.scheduler().is_shutdown());

        let result = runtime.executors().supply_async(|| Ok(1)).complete();
        assert!(result.is_err());
    }

    #[test]
    fn test_drop_shuts_down() {
        let executors = {
            let runtime = Runtime::start(config("rt-drop")).unwrap();
            Arc::clone(runtime.executors())
        };

        assert!(executors.is_shutdown());
    }
}
