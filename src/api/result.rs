use crate::prelude::*;
use crate::types::ActionError;

/// Outcome of a [`ResultedAction`](super::ResultedAction).
///
/// A successful result carries a value, the other two states carry none.
#[derive(Debug, Clone)]
pub enum ActionResult<T> {
    Success(T),
    Failure(ActionError),
    Cancelled,
}

/// Tag of an [`ActionResult`] without its payload.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ActionStatus {
    Success,
    Failure,
    Cancelled,
}

impl<T> ActionResult<T> {
    pub fn success(value: T) -> Self {
        ActionResult::Success(value)
    }

    /// A failed result. The error is stored as is, even if it is [`ActionError::Cancelled`];
    /// cancellation is only produced by the cancellation path itself.
    pub fn failure(error: impl Into<ActionError>) -> Self {
        ActionResult::Failure(error.into())
    }

    pub fn cancelled() -> Self {
        ActionResult::Cancelled
    }

    /// Converts an error raised at an action boundary, recognizing cancellation.
    pub(crate) fn from_error(error: ActionError) -> Self {
        match error {
            ActionError::Cancelled => ActionResult::Cancelled,
            error => ActionResult::Failure(error),
        }
    }

    pub fn status(&self) -> ActionStatus {
        match self {
            ActionResult::Success(_) => ActionStatus::Success,
            ActionResult::Failure(_) => ActionStatus::Failure,
            ActionResult::Cancelled => ActionStatus::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ActionResult::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ActionResult::Failure(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ActionResult::Cancelled)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            ActionResult::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            ActionResult::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ActionError> {
        match self {
            ActionResult::Failure(error) => Some(error),
            _ => None,
        }
    }

    /// Converts into a `Result`; a cancelled result becomes `Err(ActionError::Cancelled)`.
    pub fn into_result(self) -> Result<T, ActionError> {
        match self {
            ActionResult::Success(value) => Ok(value),
            ActionResult::Failure(error) => Err(error),
            ActionResult::Cancelled => Err(ActionError::Cancelled),
        }
    }

    pub fn map<U, F>(self, fun: F) -> ActionResult<U>
    where
        F: FnOnce(T) -> U,
    {
        self.and_then(|value| ActionResult::Success(fun(value)))
    }

    /// Calls `fun` on a successful value. Failures and cancellation are forwarded unchanged.
    pub fn and_then<U, F>(self, fun: F) -> ActionResult<U>
    where
        F: FnOnce(T) -> ActionResult<U>,
    {
        match self {
            ActionResult::Success(value) => fun(value),
            ActionResult::Failure(error) => ActionResult::Failure(error),
            ActionResult::Cancelled => ActionResult::Cancelled,
        }
    }

    /// Logs the outcome of the action called `name`.
    pub fn report(&self, name: &str) {
        match self {
            ActionResult::Success(_) => info!("action {:?} completed successfully", name),
            ActionResult::Cancelled => warn!("action {:?} was cancelled", name),
            ActionResult::Failure(error) => error!("action {:?} failed: {}", name, error),
        }
    }
}

impl<T> From<Result<T, ActionError>> for ActionResult<T> {
    fn from(result: Result<T, ActionError>) -> Self {
        match result {
            Ok(value) => ActionResult::Success(value),
            Err(error) => ActionResult::from_error(error),
        }
    }
}
