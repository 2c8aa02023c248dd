//! Delayed and repeating background tasks, run on the pools of an [`ExecutorManager`].
mod task;
mod timer;

use self::task::Registry;
use self::timer::Timer;
use crate::executor::{ExecutorManager, SharedExecutor};
use crate::prelude::*;
use crate::types::{ExecutorKind, ScheduleError, SchedulerConfig, TaskId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use self::task::{Task, TaskStatus};

/// Runs work now, later, or periodically, and keeps track of the tasks it created so they can
/// be cancelled by identifier.
///
/// Functions without the `_async` suffix run work on the CPU pool, the `_async` variants use
/// the IO pool. A panic in a task is logged and never reaches the pool thread; a repeating task
/// keeps its schedule after one of its runs panicked.
pub struct Scheduler {
    executors: Arc<ExecutorManager>,
    registry: Arc<Registry>,
    timer: Timer,
    shutdown: AtomicBool,
}

impl Scheduler {
    pub fn new(
        executors: Arc<ExecutorManager>,
        config: &SchedulerConfig,
    ) -> Result<Self, ScheduleError> {
        let registry = Arc::new(Registry::new());
        let timer = Timer::start(config, Arc::clone(&registry))?;
        debug!("started scheduler timer {:?}", config.timer_thread_name);

        Ok(Self {
            executors,
            registry,
            timer,
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn executors(&self) -> &Arc<ExecutorManager> {
        &self.executors
    }

    pub fn run_now<F>(&self, work: F) -> Result<Task, ScheduleError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_once(ExecutorKind::Cpu, None, work)
    }

    pub fn run_now_async<F>(&self, work: F) -> Result<Task, ScheduleError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_once(ExecutorKind::Io, None, work)
    }

    pub fn run_later<F>(&self, work: F, delay: Duration) -> Result<Task, ScheduleError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_once(ExecutorKind::Cpu, Some(delay), work)
    }

    pub fn run_later_async<F>(&self, work: F, delay: Duration) -> Result<Task, ScheduleError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_once(ExecutorKind::Io, Some(delay), work)
    }

    /// Runs `work` every `period`, starting after `initial_delay`.
    ///
    /// Firings are at fixed rate: the n-th run is due at `start + initial_delay + n * period`,
    /// however long earlier runs took. When a run is still going at the next due time, that
    /// firing is skipped.
    pub fn run_repeating<F>(
        &self,
        work: F,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<Task, ScheduleError>
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule_repeating(ExecutorKind::Cpu, initial_delay, period, work)
    }

    pub fn run_repeating_async<F>(
        &self,
        work: F,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<Task, ScheduleError>
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule_repeating(ExecutorKind::Io, initial_delay, period, work)
    }

    fn schedule_once<F>(
        &self,
        kind: ExecutorKind,
        delay: Option<Duration>,
        work: F,
    ) -> Result<Task, ScheduleError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_running()?;
        let executor = self.executors.get(kind)?;
        let task = Task::once(kind, work, &self.registry);

        self.start(task, executor, delay)
    }

    fn schedule_repeating<F>(
        &self,
        kind: ExecutorKind,
        initial_delay: Duration,
        period: Duration,
        work: F,
    ) -> Result<Task, ScheduleError>
    where
        F: FnMut() + Send + 'static,
    {
        if period == Duration::from_secs(0) {
            return Err(ScheduleError::ZeroPeriod);
        }

        // The first two deadlines must be representable, later ones are checked by the timer.
        deadline_after(initial_delay)?
            .checked_add(period)
            .ok_or(ScheduleError::Overflow(period))?;

        self.ensure_running()?;
        let executor = self.executors.get(kind)?;
        let task = Task::repeating(kind, period, work, &self.registry);

        self.start(task, executor, Some(initial_delay))
    }

    fn ensure_running(&self) -> Result<(), ScheduleError> {
        if self.is_shutdown() {
            Err(ScheduleError::Shutdown)
        } else {
            Ok(())
        }
    }

    fn start(
        &self,
        task: Task,
        executor: SharedExecutor,
        delay: Option<Duration>,
    ) -> Result<Task, ScheduleError> {
        let deadline = delay.map(deadline_after).transpose()?;

        // Registered before submission so that the first run can already unregister it.
        self.registry.insert(task.clone());

        let result = if self.is_shutdown() {
            Err(ScheduleError::Shutdown)
        } else {
            match deadline {
                None => task
                    .submit(&*executor)
                    .map(|_| ())
                    .map_err(ScheduleError::from),
                Some(deadline) => {
                    if self.timer.schedule(deadline, task.clone(), executor) {
                        Ok(())
                    } else {
                        Err(ScheduleError::Shutdown)
                    }
                }
            }
        };

        if let Err(e) = result {
            task.cancel();
            return Err(e);
        }

        trace!(
            "scheduled {} on {} pool (delay: {:?}, period: {:?})",
            task.id(),
            task.affinity(),
            delay,
            task.period()
        );

        Ok(task)
    }

    /// Cancels the task with the given identifier. Returns `false` if no such task is active,
    /// for example because it already completed or was cancelled before.
    pub fn cancel(&self, id: TaskId) -> bool {
        let cancelled = match self.registry.get(id) {
            Some(task) => task.cancel(),
            None => false,
        };

        if cancelled {
            self.timer.purge();
        }

        cancelled
    }

    /// Looks up an active task.
    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.registry.get(id)
    }

    /// Number of tasks that have neither completed nor been cancelled.
    pub fn active_tasks(&self) -> usize {
        self.registry.len()
    }

    /// Cancels every active task, stops the timer and shuts down both pools. Calling this more
    /// than once has no further effect.
    pub fn shutdown_all(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        let tasks = self.registry.drain();
        let cancelled = tasks.iter().filter(|task| task.cancel()).count();

        self.timer.stop();
        self.executors.shutdown();

        info!("scheduler shut down, {} tasks cancelled", cancelled);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

fn deadline_after(delay: Duration) -> Result<Instant, ScheduleError> {
    Instant::now()
        .checked_add(delay)
        .ok_or(ScheduleError::Overflow(delay))
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("active_tasks", &self.active_tasks())
            .field("pending_firings", &self.timer.pending())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::{ExecutorConfig, PoolConfig};
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc::channel;
    use std::thread;

    fn scheduler(name: &str) -> Scheduler {
        let executors = Arc::new(ExecutorManager::new());
        executors
            .initialize(&ExecutorConfig {
                io: PoolConfig::new(4, format!("{}-io", name)),
                cpu: PoolConfig::new(2, format!("{}-cpu", name)),
            })
            .unwrap();

        Scheduler::new(executors, &SchedulerConfig::default()).unwrap()
    }

    fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_run_now_affinity() {
        let scheduler = scheduler("sched-now");
        let (sender, receiver) = channel();
        let other = sender.clone();

        let name = || thread::current().name().unwrap_or_default().to_string();
        scheduler.run_now(move || sender.send(name()).unwrap()).unwrap();
        let cpu = receiver.recv_timeout(Duration::from_secs(5)).unwrap();

        scheduler
            .run_now_async(move || other.send(name()).unwrap())
            .unwrap();
        let io = receiver.recv_timeout(Duration::from_secs(5)).unwrap();

        assert!(cpu.starts_with("sched-now-cpu"), "{}", cpu);
        assert_eq!(io, "sched-now-io");
        scheduler.shutdown_all();
    }

    #[test]
    fn test_run_later() {
        let scheduler = scheduler("sched-later");
        let (sender, receiver) = channel();
        let delay = Duration::from_millis(50);

        let before = Instant::now();
        let task = scheduler
            .run_later_async(move || sender.send(Instant::now()).unwrap(), delay)
            .unwrap();
        assert_eq!(task.status(), TaskStatus::Scheduled);
        assert!(!task.is_repeating());

        let fired = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(fired - before >= delay);

        assert!(wait_for(|| task.status() == TaskStatus::Completed));
        assert_eq!(scheduler.active_tasks(), 0);

        // Cancelling a completed task is a no-op.
        assert!(!scheduler.cancel(task.id()));
        assert!(!task.cancel());
        assert_eq!(task.status(), TaskStatus::Completed);
        scheduler.shutdown_all();
    }

    #[test]
    fn test_fixed_rate() {
        let scheduler = scheduler("sched-rate");
        let firings = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&firings);

        let initial_delay = Duration::from_millis(50);
        let period = Duration::from_millis(100);
        let start = Instant::now();

        let task = scheduler
            .run_repeating_async(
                move || {
                    recorded.lock().push(Instant::now());
                    // Runs take a good part of the period, which must not shift the schedule.
                    thread::sleep(Duration::from_millis(60));
                },
                initial_delay,
                period,
            )
            .unwrap();

        assert!(wait_for(|| firings.lock().len() >= 5));
        assert!(scheduler.cancel(task.id()));

        let firings = firings.lock().clone();
        for (k, fired) in firings.iter().take(5).enumerate() {
            let expected = start + initial_delay + period * k as u32;
            assert!(*fired >= expected, "firing {} came early", k);
            assert!(
                *fired - expected < Duration::from_millis(60),
                "firing {} is {:?} late",
                k,
                *fired - expected
            );
        }
        scheduler.shutdown_all();
    }

    #[test]
    fn test_cancel_repeating() {
        let scheduler = scheduler("sched-cancel");
        let counter = Arc::new(AtomicUsize::new(0));
        let (sender, receiver) = channel();
        let c = Arc::clone(&counter);

        let task = scheduler
            .run_repeating(
                move || {
                    c.fetch_add(1, Ordering::SeqCst);
                    let _ = sender.send(());
                },
                Duration::from_millis(100),
                Duration::from_millis(100),
            )
            .unwrap();

        for _ in 0..3 {
            receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        }

        assert!(scheduler.cancel(task.id()));
        assert!(!scheduler.cancel(task.id()));
        assert!(task.is_cancelled());
        assert!(scheduler.task(task.id()).is_none());

        thread::sleep(Duration::from_millis(500));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        scheduler.shutdown_all();
    }

    #[test]
    fn test_panicking_task_keeps_firing() {
        let scheduler = scheduler("sched-panic");
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        let task = scheduler
            .run_repeating_async(
                move || {
                    c.fetch_add(1, Ordering::SeqCst);
                    panic!("repeating task failed");
                },
                Duration::from_millis(0),
                Duration::from_millis(20),
            )
            .unwrap();

        assert!(wait_for(|| counter.load(Ordering::SeqCst) >= 3));
        assert!(!task.is_done());
        assert!(task.cancel());
        scheduler.shutdown_all();
    }

    #[test]
    fn test_zero_period() {
        let scheduler = scheduler("sched-zero");
        let result = scheduler.run_repeating(|| {}, Duration::from_millis(1), Duration::from_secs(0));

        assert_eq!(result.unwrap_err(), ScheduleError::ZeroPeriod);
        assert_eq!(scheduler.active_tasks(), 0);
        scheduler.shutdown_all();
    }

    #[test]
    fn test_delay_out_of_clock_range() {
        let scheduler = scheduler("sched-overflow");

        assert_eq!(
            scheduler
                .run_repeating_async(|| {}, Duration::from_millis(0), Duration::MAX)
                .unwrap_err(),
            ScheduleError::Overflow(Duration::MAX)
        );
        assert_eq!(
            scheduler.run_later_async(|| {}, Duration::MAX).unwrap_err(),
            ScheduleError::Overflow(Duration::MAX)
        );
        assert_eq!(scheduler.active_tasks(), 0);

        // Nothing was left half scheduled and the timer still fires.
        let (sender, receiver) = channel();
        scheduler
            .run_later_async(move || sender.send(()).unwrap(), Duration::from_millis(10))
            .unwrap();
        receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        scheduler.shutdown_all();
    }

    #[test]
    fn test_cancel_releases_pending_firings() {
        let scheduler = scheduler("sched-purge");

        let delayed = scheduler
            .run_later_async(|| panic!("must not run"), Duration::from_secs(3600))
            .unwrap();
        let repeating = scheduler
            .run_repeating(|| {}, Duration::from_secs(3600), Duration::from_secs(60))
            .unwrap();
        assert!(format!("{:?}", scheduler).contains("pending_firings: 2"));

        assert!(scheduler.cancel(delayed.id()));
        assert!(format!("{:?}", scheduler).contains("pending_firings: 1"));

        // Cancelling through the handle is noticed as well.
        assert!(repeating.cancel());
        assert!(format!("{:?}", scheduler).contains("pending_firings: 0"));
        assert_eq!(scheduler.active_tasks(), 0);
        scheduler.shutdown_all();
    }

    #[test]
    fn test_uninitialized_executors() {
        let executors = Arc::new(ExecutorManager::new());
        let scheduler = Scheduler::new(executors, &SchedulerConfig::default()).unwrap();

        assert!(matches!(
            scheduler.run_now(|| {}),
            Err(ScheduleError::Executor(_))
        ));
        assert_eq!(scheduler.active_tasks(), 0);
    }

    #[test]
    fn test_shutdown_all() {
        let scheduler = scheduler("sched-shutdown");

        let repeating = scheduler
            .run_repeating(|| {}, Duration::from_secs(60), Duration::from_secs(1))
            .unwrap();
        let delayed = scheduler
            .run_later_async(|| panic!("must not run"), Duration::from_secs(60))
            .unwrap();
        assert_eq!(scheduler.active_tasks(), 2);

        scheduler.shutdown_all();
        scheduler.shutdown_all();

        assert!(scheduler.is_shutdown());
        assert!(scheduler.executors().is_shutdown());
        assert!(repeating.is_cancelled());
        assert!(delayed.is_cancelled());
        assert_eq!(scheduler.active_tasks(), 0);
        assert_eq!(
            scheduler.run_now(|| {}).unwrap_err(),
            ScheduleError::Shutdown
        );
    }
}
