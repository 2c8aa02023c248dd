//! User-facing asynchronous actions and their combinators.
mod action;
mod result;
mod resulted;

use crate::executor::{Executor, Job};
use crate::prelude::*;
use crate::types::{panic_message, ActionError, ExecutorError};
use conduit_core::util::{DropGuard, Promise};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use self::action::*;
pub use self::result::*;
pub use self::resulted::*;

/// Error returned by work that noticed it was cancelled.
///
/// Returning this from the work of a [`ResultedAction`] (usually through
/// [`CancelToken::checkpoint`]) resolves the action as cancelled instead of failed.
#[derive(Error, Debug, Copy, Clone, Default, PartialEq, Eq)]
#[error("operation was cancelled")]
pub struct Cancelled;

/// Flag used to ask running work to stop early.
///
/// Every stage of a [`ResultedAction`] chain has its own token, created as a child of the token
/// of the stage it was derived from. Cancelling a token is seen by the token itself and by all
/// of its descendants, never by its parent or its siblings.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    node: Arc<TokenNode>,
}

#[derive(Debug, Default)]
struct TokenNode {
    flag: AtomicBool,
    parent: Option<Arc<TokenNode>>,
}

impl CancelToken {
    pub fn new() -> Self {
        default()
    }

    /// A new token that is cancelled whenever this one is, but can also be cancelled on its
    /// own without affecting this one.
    pub fn child(&self) -> Self {
        Self {
            node: Arc::new(TokenNode {
                flag: AtomicBool::new(false),
                parent: Some(Arc::clone(&self.node)),
            }),
        }
    }

    pub fn cancel(&self) {
        self.node.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        let mut node = Some(&self.node);

        while let Some(current) = node {
            if current.flag.load(Ordering::SeqCst) {
                return true;
            }
            node = current.parent.as_ref();
        }

        false
    }

    /// Returns `Err(Cancelled)` once the token has been tripped, meant to be used with `?` from
    /// inside long running work.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Runs user code, folding both returned errors and panics into an [`ActionError`].
pub(crate) fn catch<T, F>(fun: F) -> Result<T, ActionError>
where
    F: FnOnce() -> Result<T>,
{
    match catch_unwind(AssertUnwindSafe(fun)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ActionError::from(e)),
        Err(payload) => Err(ActionError::from_panic(payload)),
    }
}

/// Runs a user callback. A panic is logged and does not stop the thread that completed the
/// action.
pub(crate) fn invoke<F>(what: &str, fun: F)
where
    F: FnOnce(),
{
    if let Err(payload) = catch_unwind(AssertUnwindSafe(fun)) {
        error!("{} panicked: {}", what, panic_message(&*payload));
    }
}

/// Submits `job` to `executor` and resolves `promise` with its output.
///
/// The promise is resolved in every case: if the executor rejects the job, or drops it without
/// running it, the promise receives `lift(Rejected)`. If the promise was already completed by
/// the time the job gets to run (for example because it was cancelled), the job is skipped.
pub(crate) fn dispatch<O, F>(
    executor: &dyn Executor,
    promise: Promise<O>,
    lift: fn(ActionError) -> O,
    job: F,
) where
    O: Clone + Send + 'static,
    F: FnOnce() -> O + Send + 'static,
{
    let pool = executor.name().to_string();
    let guard = DropGuard::new((promise, job), move |(promise, _): (Promise<O>, F)| {
        debug!("job was dropped by {} before it could run", pool);
        promise.complete(lift(ExecutorError::Rejected { pool }.into()));
    });

    let job: Job = Box::new(move || {
        let (promise, job) = guard.disarm();
        if promise.is_completed() {
            return;
        }

        let output = match catch_unwind(AssertUnwindSafe(job)) {
            Ok(output) => output,
            Err(payload) => lift(ActionError::from_panic(payload)),
        };

        promise.complete(output);
    });

    if let Err(e) = executor.execute(job) {
        // The rejected job has already been dropped, which resolved the promise.
        trace!("{}", e);
    }
}
