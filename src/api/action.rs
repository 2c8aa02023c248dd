use super::{catch, dispatch, invoke, ActionResult, CancelToken, ResultedAction};
use crate::executor::{Executor, SharedExecutor};
use crate::prelude::*;
use crate::types::ActionError;
use conduit_core::util::{Future, Promise};
use std::fmt;
use std::time::Duration;

/// Asynchronous computation producing a `T` or failing with an [`ActionError`].
///
/// An action resolves exactly once. Its outcome can be observed any number of times and from
/// any thread, either by blocking ([`complete`](Self::complete)) or by registering callbacks
/// ([`queue_with`](Self::queue_with)). Combinators never modify an action, they return a new
/// one that is resolved when the previous stage is.
///
/// Stages run on whichever thread resolved the previous stage, unless moved elsewhere with
/// [`on_executor`](Self::on_executor).
pub struct Action<T> {
    future: Future<Result<T, ActionError>>,
}

impl<T> Clone for Action<T> {
    fn clone(&self) -> Self {
        Self {
            future: self.future.clone(),
        }
    }
}

impl<T> fmt::Debug for Action<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("future", &self.future)
            .finish()
    }
}

impl<T> Action<T>
where
    T: Clone + Send + 'static,
{
    /// Runs `work` on `executor`. An error returned by `work`, or a panic, fails the action.
    pub fn supply_async<F>(executor: &dyn Executor, work: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (promise, future) = Promise::new();
        dispatch(executor, promise, Err, move || catch(work));

        Self { future }
    }

    /// An action that is already resolved to `value`.
    pub fn completed(value: T) -> Self {
        Self {
            future: Future::ready(Ok(value)),
        }
    }

    /// An action that has already failed with `error`.
    pub fn failed(error: impl Into<ActionError>) -> Self {
        Self {
            future: Future::ready(Err(error.into())),
        }
    }

    /// Applies `fun` to the value once it is available.
    ///
    /// If this action fails, `fun` is not called and the new action fails with the same error.
    /// A panic in `fun` fails the new action.
    pub fn map<U, F>(&self, fun: F) -> Action<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.try_map(move |value| Ok(fun(value)))
    }

    /// Like [`map`](Self::map), but `fun` may fail.
    pub fn try_map<U, F>(&self, fun: F) -> Action<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let future = self
            .future
            .map(move |result| result.and_then(|value| catch(move || fun(value))));

        Action { future }
    }

    /// Chains an action that depends on the value of this one. The new action resolves to
    /// whatever the nested action resolves to.
    pub fn flat_map<U, F>(&self, fun: F) -> Action<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Action<U> + Send + 'static,
    {
        let (promise, future) = Promise::new();

        self.future.attach_callback(move |result| {
            match result.and_then(|value| catch(move || Ok(fun(value)))) {
                Ok(inner) => inner.future.attach_callback(move |result| {
                    promise.complete(result);
                }),
                Err(e) => {
                    promise.complete(Err(e));
                }
            }
        });

        Action { future }
    }

    /// Resolves the new action on `executor`, so that stages chained after it run there.
    ///
    /// If `executor` has been shut down the new action fails with
    /// [`ExecutorError::Rejected`](crate::types::ExecutorError::Rejected).
    pub fn on_executor(&self, executor: SharedExecutor) -> Action<T> {
        let (promise, future) = Promise::new();

        self.future.attach_callback(move |result| {
            dispatch(&*executor, promise, Err, move || result);
        });

        Action { future }
    }

    /// Replaces a failure by `fallback`. The new action always succeeds.
    pub fn on_error_return(&self, fallback: T) -> Action<T> {
        let future = self.future.map(move |result| match result {
            Ok(value) => Ok(value),
            Err(e) => {
                debug!("action failed, using fallback value: {}", e);
                Ok(fallback)
            }
        });

        Action { future }
    }

    /// Fire and forget. A failure is logged since nobody else will see it.
    pub fn queue(&self) {
        self.future.attach_callback(|result| {
            if let Err(e) = result {
                error!("unobserved action failed: {}", e);
            }
        });
    }

    /// Calls `on_success` with the value. A failure is logged.
    pub fn queue_then<S>(&self, on_success: S)
    where
        S: FnOnce(T) + Send + 'static,
    {
        self.future.attach_callback(move |result| match result {
            Ok(value) => invoke("success callback", move || on_success(value)),
            Err(e) => error!("unobserved action failed: {}", e),
        });
    }

    /// Calls exactly one of the two callbacks, on the thread that resolves the action.
    pub fn queue_with<S, E>(&self, on_success: S, on_failure: E)
    where
        S: FnOnce(T) + Send + 'static,
        E: FnOnce(ActionError) + Send + 'static,
    {
        self.future.attach_callback(move |result| match result {
            Ok(value) => invoke("success callback", move || on_success(value)),
            Err(e) => invoke("failure callback", move || on_failure(e)),
        });
    }

    /// Blocks until the action is resolved.
    ///
    /// This must never be called from a thread of the pool that is supposed to resolve this
    /// action: if every thread of that pool waits, nothing is left to do the work and the pool
    /// deadlocks.
    pub fn complete(&self) -> Result<T, ActionError> {
        self.future.wait()
    }

    /// Blocks until the action is resolved or `timeout` has passed, whichever comes first.
    ///
    /// On timeout this returns [`ActionError::Timeout`]. The work itself keeps running. The same
    /// deadlock warning as for [`complete`](Self::complete) applies.
    pub fn complete_timeout(&self, timeout: Duration) -> Result<T, ActionError> {
        self.future
            .wait_timeout(timeout)
            .unwrap_or(Err(ActionError::Timeout(timeout)))
    }

    /// Plain future for the outcome of this action.
    pub fn submit(&self) -> Future<Result<T, ActionError>> {
        self.future.clone()
    }

    pub fn is_done(&self) -> bool {
        self.future.is_ready()
    }

    /// Turns this action into one that never fails, see [`ResultedAction`].
    pub fn into_resulted(self) -> ResultedAction<T> {
        let (promise, future) = Promise::new();
        let downstream = promise.clone();

        self.future.attach_callback(move |result| {
            downstream.complete(ActionResult::from(result));
        });

        ResultedAction::from_parts(promise, future, CancelToken::new())
    }
}

impl Action<()> {
    /// Runs a side effect on `executor`.
    pub fn run_async<F>(executor: &dyn Executor, work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::supply_async(executor, move || {
            work();
            Ok(())
        })
    }
}
