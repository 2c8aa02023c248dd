//! Timer thread firing delayed and repeating tasks.
use super::task::Registry;
use super::Task;
use crate::executor::SharedExecutor;
use crate::prelude::*;
use crate::types::{panic_message, ExecutorError, SchedulerConfig};
use conduit_core::util::OrderedQueue;
use parking_lot::{Condvar, MutexGuard};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

struct Entry {
    task: Task,
    executor: SharedExecutor,
}

#[derive(Default)]
struct TimerState {
    queue: OrderedQueue<Instant, Entry>,
    shutdown: bool,
}

impl TimerState {
    /// Drops the entries of tasks that were cancelled (or completed) before they fired.
    fn purge(&mut self, registry: &Registry) {
        if registry.take_cancelled() == 0 {
            return;
        }

        let removed = self.queue.retain(|_, entry| !entry.task.is_done());
        if removed > 0 {
            trace!("purged {} firings of cancelled tasks", removed);
        }
    }
}

struct Shared {
    state: Mutex<TimerState>,
    cond: Condvar,
    registry: Arc<Registry>,
}

/// Single thread that sleeps until the earliest deadline and then hands the due task to its
/// executor. Tasks never run on the timer thread itself.
pub(crate) struct Timer {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Timer {
    pub(crate) fn start(
        config: &SchedulerConfig,
        registry: Arc<Registry>,
    ) -> Result<Self, ExecutorError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(default()),
            cond: Condvar::new(),
            registry,
        });

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(config.timer_thread_name.clone())
            .spawn(move || run_timer(&thread_shared))
            .map_err(|e| ExecutorError::Spawn {
                pool: config.timer_thread_name.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Fires `task` on `executor` at `deadline`. Returns `false` if the timer has been stopped.
    pub(crate) fn schedule(&self, deadline: Instant, task: Task, executor: SharedExecutor) -> bool {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return false;
        }

        state.purge(&self.shared.registry);
        state.queue.push(deadline, Entry { task, executor });
        drop(state);

        // The new deadline may be earlier than the one the timer is sleeping towards.
        self.shared.cond.notify_one();
        true
    }

    /// Number of firings waiting for their deadline, not counting cancelled tasks.
    pub(crate) fn pending(&self) -> usize {
        let mut state = self.shared.state.lock();
        state.purge(&self.shared.registry);
        state.queue.len()
    }

    /// Releases the entries of cancelled tasks now instead of at their deadline.
    pub(crate) fn purge(&self) {
        self.shared.state.lock().purge(&self.shared.registry);
    }

    /// Stops the timer thread and waits for it to exit. Entries that have not fired are dropped.
    pub(crate) fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
        }

        self.shared.cond.notify_all();

        if let Some(handle) = self.handle.lock().take() {
            // Joining from the timer thread itself would never return.
            if handle.thread().id() == thread::current().id() {
                return;
            }

            if handle.join().is_err() {
                error!("timer thread panicked");
            }
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_timer(shared: &Shared) {
    let mut state = shared.state.lock();

    loop {
        if state.shutdown {
            break;
        }

        state.purge(&shared.registry);

        let now = Instant::now();
        if let Some((deadline, entry)) = state.queue.pop_min_if(|deadline| *deadline <= now) {
            let next = MutexGuard::unlocked(&mut state, || fire_guarded(deadline, &entry));

            if let Some(next) = next {
                state.queue.push(next, entry);
            }

            continue;
        }

        let next = state.queue.peek_min().map(|(deadline, _)| *deadline);
        match next {
            Some(deadline) => {
                let _ = shared.cond.wait_until(&mut state, deadline);
            }
            None => shared.cond.wait(&mut state),
        }
    }

    let dropped = state.queue.drain().count();
    debug!("timer stopped, {} pending firings dropped", dropped);
}

/// Fires one due entry. A panic while firing cancels the task instead of taking the timer
/// thread down.
fn fire_guarded(deadline: Instant, entry: &Entry) -> Option<Instant> {
    match catch_unwind(AssertUnwindSafe(|| fire(deadline, entry))) {
        Ok(next) => next,
        Err(payload) => {
            error!(
                "cancelling {}, firing it panicked: {}",
                entry.task.id(),
                panic_message(&*payload)
            );
            entry.task.cancel();
            None
        }
    }
}

/// Fires one due entry. Returns the next deadline if the task must fire again.
fn fire(deadline: Instant, entry: &Entry) -> Option<Instant> {
    let task = &entry.task;

    if task.is_done() {
        trace!("dropping firing of finished {}", task.id());
        return None;
    }

    // Fixed rate: the next firing is relative to this deadline, not to when the run ends.
    let next = match task.period() {
        Some(period) => match deadline.checked_add(period) {
            Some(next) => Some(next),
            None => {
                warn!(
                    "cancelling {}, next firing after {:?} is out of range of the clock",
                    task.id(),
                    period
                );
                task.cancel();
                return None;
            }
        },
        None => None,
    };

    match task.submit(&*entry.executor) {
        Ok(true) => {}
        Ok(false) => debug!("{} is still running, skipping this firing", task.id()),
        Err(e) => {
            warn!("cancelling {}: {}", task.id(), e);
            task.cancel();
            return None;
        }
    }

    next
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::executor::IoPool;
    use crate::scheduler::TaskStatus;
    use crate::types::{ExecutorKind, PoolConfig};
    use std::sync::mpsc::channel;
    use std::time::Duration;

    #[test]
    fn test_fires_in_deadline_order() {
        let registry = Arc::new(Registry::new());
        let timer = Timer::start(&SchedulerConfig::default(), Arc::clone(&registry)).unwrap();
        let pool: SharedExecutor = Arc::new(IoPool::new(&PoolConfig::new(1, "timer-order")));
        let (sender, receiver) = channel();

        let now = Instant::now();
        for (i, delay) in [30u64, 10, 20].iter().enumerate() {
            let sender = sender.clone();
            let task = Task::once(
                ExecutorKind::Io,
                move || sender.send(i).unwrap(),
                &registry,
            );
            assert!(timer.schedule(now + Duration::from_millis(*delay), task, Arc::clone(&pool)));
        }

        let order: Vec<usize> = (0..3)
            .map(|_| receiver.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(order, vec![1, 2, 0]);
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn test_stop() {
        let registry = Arc::new(Registry::new());
        let timer = Timer::start(&SchedulerConfig::default(), Arc::clone(&registry)).unwrap();
        let pool: SharedExecutor = Arc::new(IoPool::new(&PoolConfig::new(1, "timer-stop")));

        let task = Task::once(ExecutorKind::Io, || panic!("must not run"), &registry);
        let far = Instant::now() + Duration::from_secs(3600);
        assert!(timer.schedule(far, task.clone(), Arc::clone(&pool)));

        timer.stop();
        timer.stop();

        let other = Task::once(ExecutorKind::Io, || {}, &registry);
        assert!(!timer.schedule(Instant::now(), other, pool));
        assert_eq!(task.status(), TaskStatus::Scheduled);
    }

    #[test]
    fn test_period_out_of_clock_range() {
        let registry = Arc::new(Registry::new());
        let timer = Timer::start(&SchedulerConfig::default(), Arc::clone(&registry)).unwrap();
        let pool: SharedExecutor = Arc::new(IoPool::new(&PoolConfig::new(1, "timer-overflow")));
        let (sender, receiver) = channel();

        let task = Task::repeating(
            ExecutorKind::Io,
            Duration::MAX,
            || panic!("must not run"),
            &registry,
        );
        registry.insert(task.clone());
        assert!(timer.schedule(Instant::now(), task.clone(), Arc::clone(&pool)));

        // The timer thread is still alive and keeps firing other tasks.
        let later = Task::once(
            ExecutorKind::Io,
            move || sender.send("later").unwrap(),
            &registry,
        );
        let deadline = Instant::now() + Duration::from_millis(10);
        assert!(timer.schedule(deadline, later, pool));
        assert_eq!(
            receiver.recv_timeout(Duration::from_secs(5)).unwrap(),
            "later"
        );

        assert!(task.is_cancelled());
        assert_eq!(registry.len(), 0);
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn test_cancelled_entries_are_purged() {
        let registry = Arc::new(Registry::new());
        let timer = Timer::start(&SchedulerConfig::default(), Arc::clone(&registry)).unwrap();
        let pool: SharedExecutor = Arc::new(IoPool::new(&PoolConfig::new(1, "timer-purge")));

        let far = Instant::now() + Duration::from_secs(3600);
        let tasks: Vec<Task> = (0..3)
            .map(|_| {
                let task = Task::repeating(
                    ExecutorKind::Io,
                    Duration::from_secs(1),
                    || panic!("must not run"),
                    &registry,
                );
                registry.insert(task.clone());
                assert!(timer.schedule(far, task.clone(), Arc::clone(&pool)));
                task
            })
            .collect();
        assert_eq!(timer.pending(), 3);

        assert!(tasks[0].cancel());
        assert!(tasks[2].cancel());
        assert_eq!(timer.pending(), 1);

        // The queue itself no longer holds the cancelled entries.
        assert_eq!(timer.shared.state.lock().queue.len(), 1);
        assert!(tasks[1].cancel());
    }
}
