use super::{catch, dispatch, invoke, ActionResult, CancelToken};
use crate::executor::{Executor, SharedExecutor};
use crate::prelude::*;
use crate::types::ActionError;
use conduit_core::util::{Future, Promise};
use std::fmt;
use std::time::Duration;

/// Asynchronous computation that never fails: every outcome is an [`ActionResult`].
///
/// Combinators are only applied to successful results. A failure or cancellation travels down
/// the chain unchanged and the functions of later stages are never called.
///
/// Unlike [`Action`](super::Action), a resulted action can be cancelled. Cancelling resolves
/// the action (if it was not resolved yet) and every stage chained after it with
/// [`ActionResult::Cancelled`]. The stages it was derived from, and sibling stages derived from
/// the same parent, are not affected. Whoever resolves the action first wins: if the work finishes
/// before `cancel` is called, the result is kept and `cancel` returns `false`.
pub struct ResultedAction<T> {
    promise: Promise<ActionResult<T>>,
    future: Future<ActionResult<T>>,
    token: CancelToken,
}

impl<T> Clone for ResultedAction<T> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            future: self.future.clone(),
            token: self.token.clone(),
        }
    }
}

impl<T> fmt::Debug for ResultedAction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultedAction")
            .field("future", &self.future)
            .field("token", &self.token)
            .finish()
    }
}

impl<T> ResultedAction<T>
where
    T: Clone + Send + 'static,
{
    pub(crate) fn from_parts(
        promise: Promise<ActionResult<T>>,
        future: Future<ActionResult<T>>,
        token: CancelToken,
    ) -> Self {
        Self {
            promise,
            future,
            token,
        }
    }

    /// Runs `work` on `executor`.
    ///
    /// An error returned by `work` becomes a failure, except for
    /// [`Cancelled`](super::Cancelled) which becomes a cancelled result. Panics become failures.
    pub fn supply_async<F>(executor: &dyn Executor, work: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        Self::supply_cancellable(executor, move |_| work())
    }

    /// Like [`supply_async`](Self::supply_async), but `work` receives the chain's
    /// [`CancelToken`] so it can stop early once `cancel(true)` has been called.
    pub fn supply_cancellable<F>(executor: &dyn Executor, work: F) -> Self
    where
        F: FnOnce(&CancelToken) -> Result<T> + Send + 'static,
    {
        let (promise, future) = Promise::new();
        let token = CancelToken::new();
        let job_token = token.clone();

        dispatch(executor, promise.clone(), ActionResult::from_error, move || {
            if job_token.is_cancelled() {
                return ActionResult::Cancelled;
            }

            ActionResult::from(catch(|| work(&job_token)))
        });

        Self::from_parts(promise, future, token)
    }

    /// A resulted action that is already resolved to `result`.
    pub fn completed(result: ActionResult<T>) -> Self {
        let (promise, future) = Promise::new();
        promise.complete(result);

        Self::from_parts(promise, future, CancelToken::new())
    }

    /// Creates the next stage of this chain, with a token that is a child of this stage's token.
    fn next_stage<U>(&self) -> (Promise<ActionResult<U>>, ResultedAction<U>)
    where
        U: Clone + Send + 'static,
    {
        let (promise, future) = Promise::new();
        let stage = ResultedAction::from_parts(promise.clone(), future, self.token.child());

        (promise, stage)
    }

    /// Applies `fun` to a successful value. If `fun` panics the new result is a failure.
    pub fn map<U, F>(&self, fun: F) -> ResultedAction<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.try_map(move |value| Ok(fun(value)))
    }

    /// Like [`map`](Self::map), but `fun` may fail.
    pub fn try_map<U, F>(&self, fun: F) -> ResultedAction<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let (promise, stage) = self.next_stage();
        let token = stage.token.clone();

        self.future.attach_callback(move |result| {
            if promise.is_completed() {
                return;
            }

            let result = if token.is_cancelled() {
                ActionResult::Cancelled
            } else {
                result.and_then(|value| ActionResult::from(catch(move || fun(value))))
            };

            promise.complete(result);
        });

        stage
    }

    /// Chains a resulted action that depends on the value of this one. The new action resolves
    /// to whatever the nested action resolves to.
    pub fn flat_map<U, F>(&self, fun: F) -> ResultedAction<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> ResultedAction<U> + Send + 'static,
    {
        let (promise, stage) = self.next_stage();
        let token = stage.token.clone();

        self.future.attach_callback(move |result| {
            if promise.is_completed() {
                return;
            }

            if token.is_cancelled() {
                promise.complete(ActionResult::Cancelled);
                return;
            }

            let inner = match result {
                ActionResult::Success(value) => catch(move || Ok(fun(value))),
                ActionResult::Failure(e) => {
                    promise.complete(ActionResult::Failure(e));
                    return;
                }
                ActionResult::Cancelled => {
                    promise.complete(ActionResult::Cancelled);
                    return;
                }
            };

            match inner {
                Ok(inner) => inner.future.attach_callback(move |result| {
                    promise.complete(result);
                }),
                Err(e) => {
                    promise.complete(ActionResult::from_error(e));
                }
            }
        });

        stage
    }

    /// Resolves the new stage on `executor`, so that stages chained after it run there.
    ///
    /// If `executor` has been shut down the new stage is a failure.
    pub fn on_executor(&self, executor: SharedExecutor) -> ResultedAction<T> {
        let (promise, stage) = self.next_stage();

        self.future.attach_callback(move |result| {
            dispatch(&*executor, promise, ActionResult::from_error, move || result);
        });

        stage
    }

    /// Calls `callback` with the result, whatever it is, on the thread that resolves the action.
    pub fn queue<F>(&self, callback: F)
    where
        F: FnOnce(ActionResult<T>) + Send + 'static,
    {
        self.future.attach_callback(move |result| {
            invoke("result callback", move || callback(result));
        });
    }

    /// Blocks until the action is resolved.
    ///
    /// Must not be called from a thread of the pool that is supposed to resolve this action.
    pub fn complete(&self) -> ActionResult<T> {
        self.future.wait()
    }

    /// Blocks until the action is resolved or `timeout` has passed. On timeout the returned
    /// result is a failure with [`ActionError::Timeout`]; the action itself is not affected.
    pub fn complete_timeout(&self, timeout: Duration) -> ActionResult<T> {
        match self.future.wait_timeout(timeout) {
            Some(result) => result,
            None => ActionResult::Failure(ActionError::Timeout(timeout)),
        }
    }

    /// Plain future for the result of this action.
    pub fn submit(&self) -> Future<ActionResult<T>> {
        self.future.clone()
    }

    /// Resolves this action as cancelled, unless it was already resolved.
    ///
    /// With `may_interrupt`, the token of this stage is tripped as well, which is seen by every
    /// stage chained after it: work that has not started yet is skipped and work started through
    /// [`supply_cancellable`](Self::supply_cancellable) can observe the request. Running work
    /// is never stopped forcefully.
    ///
    /// Returns `true` if this call cancelled the action.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        let cancelled = self.promise.complete(ActionResult::Cancelled);

        if cancelled {
            debug!("cancelled action (interrupt: {})", may_interrupt);

            if may_interrupt {
                self.token.cancel();
            }
        }

        cancelled
    }

    pub fn is_done(&self) -> bool {
        self.future.is_ready()
    }

    pub fn is_cancelled(&self) -> bool {
        self.future
            .inspect(ActionResult::is_cancelled)
            .unwrap_or(false)
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}
