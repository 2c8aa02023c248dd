use crate::executor::Executor;
use crate::prelude::*;
use crate::types::{panic_message, ExecutorError, ExecutorKind, TaskId};
use crossbeam::atomic::AtomicCell;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Tasks that have not completed or been cancelled yet, by identifier.
///
/// Also counts cancellations since the last call to [`take_cancelled`](Self::take_cancelled),
/// which tells the timer that some of its entries may be dead.
#[derive(Default)]
pub(crate) struct Registry {
    tasks: Mutex<HashMap<TaskId, Task>>,
    cancelled: AtomicUsize,
}

impl Registry {
    pub(crate) fn new() -> Self {
        default()
    }

    pub(crate) fn insert(&self, task: Task) {
        self.tasks.lock().insert(task.id(), task);
    }

    pub(crate) fn remove(&self, id: TaskId) -> Option<Task> {
        self.tasks.lock().remove(&id)
    }

    pub(crate) fn get(&self, id: TaskId) -> Option<Task> {
        self.tasks.lock().get(&id).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub(crate) fn drain(&self) -> Vec<Task> {
        self.tasks.lock().drain().map(|(_, task)| task).collect()
    }

    fn record_cancel(&self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of tasks cancelled since the previous call.
    pub(crate) fn take_cancelled(&self) -> usize {
        self.cancelled.swap(0, Ordering::SeqCst)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Waiting for its (next) firing.
    Scheduled,
    Running,
    /// A one-shot task that has run.
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }
}

enum Work {
    Once(Box<dyn FnOnce() + Send>),
    Repeating(Box<dyn FnMut() + Send>),
}

struct TaskInner {
    id: TaskId,
    affinity: ExecutorKind,
    period: Option<Duration>,
    status: AtomicCell<TaskStatus>,
    // Set while a run of this task has been handed to an executor and has not finished.
    in_flight: AtomicBool,
    work: Mutex<Option<Work>>,
    registry: Weak<Registry>,
}

/// Handle to a scheduled unit of work.
///
/// Handles are cheap to clone. Cancelling through any of them cancels the task.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("affinity", &self.inner.affinity)
            .field("period", &self.inner.period)
            .field("status", &self.status())
            .finish()
    }
}

impl Task {
    fn new(
        affinity: ExecutorKind,
        period: Option<Duration>,
        work: Work,
        registry: &Arc<Registry>,
    ) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id: TaskId::next(),
                affinity,
                period,
                status: AtomicCell::new(TaskStatus::Scheduled),
                in_flight: AtomicBool::new(false),
                work: Mutex::new(Some(work)),
                registry: Arc::downgrade(registry),
            }),
        }
    }

    pub(crate) fn once<F>(affinity: ExecutorKind, work: F, registry: &Arc<Registry>) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::new(affinity, None, Work::Once(Box::new(work)), registry)
    }

    pub(crate) fn repeating<F>(
        affinity: ExecutorKind,
        period: Duration,
        work: F,
        registry: &Arc<Registry>,
    ) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self::new(
            affinity,
            Some(period),
            Work::Repeating(Box::new(work)),
            registry,
        )
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// The pool this task runs on.
    pub fn affinity(&self) -> ExecutorKind {
        self.inner.affinity
    }

    pub fn period(&self) -> Option<Duration> {
        self.inner.period
    }

    pub fn is_repeating(&self) -> bool {
        self.inner.period.is_some()
    }

    pub fn status(&self) -> TaskStatus {
        self.inner.status.load()
    }

    pub fn is_cancelled(&self) -> bool {
        self.status() == TaskStatus::Cancelled
    }

    pub fn is_done(&self) -> bool {
        self.status().is_terminal()
    }

    /// Cancels the task and removes it from its scheduler.
    ///
    /// A run that is in progress is not interrupted, but it will be the last one. Returns
    /// `false` if the task had already completed or been cancelled.
    pub fn cancel(&self) -> bool {
        let mut current = self.status();

        loop {
            if current.is_terminal() {
                return false;
            }

            match self
                .inner
                .status
                .compare_exchange(current, TaskStatus::Cancelled)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let work = self.inner.work.lock().take();
        drop(work);

        if let Some(registry) = self.inner.registry.upgrade() {
            registry.remove(self.inner.id);
            registry.record_cancel();
        }

        debug!("cancelled {}", self.inner.id);
        true
    }

    fn unregister(&self) {
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.remove(self.inner.id);
        }
    }

    /// Hands one run of this task to `executor`.
    ///
    /// Returns `Ok(false)` without submitting anything if the previous run has not finished
    /// yet, so runs of one task never overlap.
    pub(crate) fn submit(&self, executor: &dyn Executor) -> Result<bool, ExecutorError> {
        if self.inner.in_flight.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }

        let task = self.clone();
        match executor.execute(Box::new(move || task.run())) {
            Ok(()) => Ok(true),
            Err(e) => {
                self.inner.in_flight.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn run(&self) {
        if self
            .inner
            .status
            .compare_exchange(TaskStatus::Scheduled, TaskStatus::Running)
            .is_ok()
        {
            let work = self.inner.work.lock().take();

            match work {
                Some(Work::Once(fun)) => {
                    self.guarded(fun);

                    if self
                        .inner
                        .status
                        .compare_exchange(TaskStatus::Running, TaskStatus::Completed)
                        .is_ok()
                    {
                        trace!("{} completed", self.inner.id);
                        self.unregister();
                    }
                }
                Some(Work::Repeating(mut fun)) => {
                    self.guarded(&mut fun);

                    // Put the work back first: a cancel in between must be able to drop it.
                    *self.inner.work.lock() = Some(Work::Repeating(fun));

                    if self
                        .inner
                        .status
                        .compare_exchange(TaskStatus::Running, TaskStatus::Scheduled)
                        .is_err()
                    {
                        let work = self.inner.work.lock().take();
                        drop(work);
                    }
                }
                None => {
                    warn!("{} was fired without any work attached", self.inner.id);
                }
            }
        }

        self.inner.in_flight.store(false, Ordering::SeqCst);
    }

    fn guarded<F: FnOnce()>(&self, fun: F) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(fun)) {
            error!(
                "{} ({} pool) panicked: {}",
                self.inner.id,
                self.inner.affinity,
                panic_message(&*payload)
            );
        }
    }
}
