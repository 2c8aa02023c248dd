//! Common types used throughout the conduit runtime.
mod config;
mod error;

use std::fmt::{self, Display};
use std::sync::atomic::{AtomicU64, Ordering};

pub use self::config::*;
pub use self::error::*;
pub(crate) use self::error::panic_message;

/// Identifier of a scheduled task, unique for the lifetime of the process.
#[derive(Debug, Copy, Clone, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    pub(crate) fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task{}", self.0)
    }
}

/// The two execution contexts managed by the [`ExecutorManager`](crate::executor::ExecutorManager).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ExecutorKind {
    /// Blocking or waiting work (network, disk, sleeping).
    Io,
    /// Compute-bound work.
    Cpu,
}

impl Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorKind::Io => write!(f, "io"),
            ExecutorKind::Cpu => write!(f, "cpu"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_task_ids_are_unique() {
        let a = TaskId::next();
        let b = TaskId::next();
        assert!(b > a);
        assert_ne!(a, b);
        assert_eq!(format!("{}", TaskId(3)), "task3");
    }
}
