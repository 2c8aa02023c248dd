use crate::api::Cancelled;
use crate::prelude::*;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// Errors raised by the executor pools and their manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("executors have not been initialized, call `ExecutorManager::initialize` first")]
    Uninitialized,

    #[error("executors have been shut down and cannot be initialized again")]
    AlreadyShutdown,

    #[error("pool {pool:?} has been shut down and rejected the job")]
    Rejected { pool: String },

    #[error("failed to start {pool:?}: {reason}")]
    Spawn { pool: String, reason: String },
}

/// Terminal error of an [`Action`](crate::api::Action).
///
/// The same error can be observed by any number of consumers, so it is cheap to clone: the
/// failure of user work is kept behind an `Arc`.
#[derive(Error, Debug, Clone)]
pub enum ActionError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("{0:#}")]
    Failed(Arc<Error>),

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("action was cancelled")]
    Cancelled,
}

impl ActionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ActionError::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ActionError::Timeout(_))
    }

    /// The error returned by user work, if that is what caused this failure.
    pub fn failure(&self) -> Option<&Error> {
        match self {
            ActionError::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        self.failure().and_then(|e| e.downcast_ref::<E>())
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        ActionError::Panicked(panic_message(&*payload))
    }
}

impl From<Error> for ActionError {
    fn from(error: Error) -> Self {
        // Errors that already went through an action boundary keep their original kind.
        let error = match error.downcast::<ActionError>() {
            Ok(inner) => return inner,
            Err(e) => e,
        };

        if error.is::<Cancelled>() {
            return ActionError::Cancelled;
        }

        ActionError::Failed(Arc::new(error))
    }
}

/// Errors returned when scheduling a task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("scheduler has been shut down")]
    Shutdown,

    #[error("period of a repeating task must be greater than zero")]
    ZeroPeriod,

    #[error("delay of {0:?} reaches beyond the range of the clock")]
    Overflow(Duration),
}

/// Best-effort extraction of the message carried by a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<unknown panic payload>".to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_anyhow_conversion() {
        let error = ActionError::from(anyhow!("disk on fire"));
        assert!(matches!(error, ActionError::Failed(_)));
        assert_eq!(error.to_string(), "disk on fire");

        let error = ActionError::from(Error::new(Cancelled));
        assert!(error.is_cancelled());

        let nested = Error::new(ActionError::Timeout(Duration::from_secs(1)));
        assert!(ActionError::from(nested).is_timeout());
    }

    #[test]
    fn test_downcast() {
        #[derive(Error, Debug)]
        #[error("not found: {0}")]
        struct NotFound(u32);

        let error = ActionError::from(Error::new(NotFound(4)));
        assert_eq!(error.downcast_ref::<NotFound>().map(|e| e.0), Some(4));
        assert!(ActionError::Cancelled.downcast_ref::<NotFound>().is_none());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*payload), "bang");

        let payload: Box<dyn Any + Send> = Box::new(17u8);
        assert_eq!(panic_message(&*payload), "<unknown panic payload>");
    }
}
