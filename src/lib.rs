//! Asynchronous actions with combinators, a pair of worker pools (IO and CPU) to run them on,
//! and a scheduler for delayed and repeating tasks.

#[macro_use]
mod prelude;
pub mod api;
pub mod executor;
mod runtime;
pub mod scheduler;
pub mod types;

pub use api::{Action, ActionResult, ActionStatus, CancelToken, Cancelled, ResultedAction};
pub use executor::{Executor, ExecutorManager, SharedExecutor};
pub use runtime::Runtime;
pub use scheduler::{Scheduler, Task, TaskStatus};
pub use types::{ActionError, Config, ExecutorError, ExecutorKind, ScheduleError, TaskId};

pub fn hostname() -> &'static str {
    lazy_static::lazy_static! {
        static ref HOSTNAME: String = {
            match ::hostname::get() {
                Ok(s) => s.to_string_lossy().into_owned(),
                Err(_) => "<anonymous>".into(),
            }
        };
    };

    &*HOSTNAME
}

pub fn initialize_logger() {
    use crate::prelude::hostname;
    use std::time::Instant;

    lazy_static::lazy_static! {
        static ref START_TIMING: Instant = Instant::now();
    }

    let _ = *START_TIMING;

    env_logger::Builder::from_default_env()
        .format(|formatter, record| {
            use std::io::Write;
            let duration = START_TIMING.elapsed();

            writeln!(
                formatter,
                "[{} {} {:.06}] {}: {}",
                hostname(),
                record.module_path().unwrap_or("?"),
                duration.as_secs_f64(),
                record.level(),
                record.args(),
            )
        })
        .init();
}
