use crate::prelude::*;
use parking_lot::Condvar;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Value of `T` which will arrive at some later point in time.
///
/// A future is a read handle on a single-assignment slot. It can be cloned and observed any
/// number of times: every clone sees the same value once the associated [`Promise`] has been
/// completed.
pub struct Future<T = ()> {
    inner: Arc<Inner<T>>,
}

/// Object used to resolve a `Future<T>`.
///
/// Promises can be cloned to let several producers race for the same slot (for example, a worker
/// producing a value and a caller cancelling it). Only the first call to [`Promise::complete`]
/// has an effect.
pub struct Promise<T = ()> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    cond: Condvar,
    state: Mutex<State<T>>,
}

type Callback<T> = Box<dyn FnOnce(T) + Send>;

use State::*;

enum State<T> {
    Pending(Vec<Callback<T>>),
    Completed(T),
}

impl<T> fmt::Debug for State<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pending(callbacks) => write!(f, "Pending({} callbacks)", callbacks.len()),
            Completed(_) => write!(f, "Completed(_)"),
        }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Future")
            .field(&*self.inner.state.lock())
            .finish()
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Promise")
            .field(&*self.inner.state.lock())
            .finish()
    }
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Promise<T> {
    /// Create a new future and promise. The promise should be given to the producer to write
    /// the value while the future must be given to the consumer to read the value.
    pub fn new() -> (Promise<T>, Future<T>) {
        let inner = Arc::new(Inner {
            cond: Condvar::new(),
            state: Mutex::new(Pending(vec![])),
        });
        let inner2 = Arc::clone(&inner);

        (Promise { inner }, Future { inner: inner2 })
    }

    /// Returns a read handle on the slot this promise writes to.
    pub fn future(&self) -> Future<T> {
        Future {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Returns `true` if some producer already completed the slot.
    pub fn is_completed(&self) -> bool {
        matches!(&*self.inner.state.lock(), Completed(_))
    }
}

impl<T: Clone> Promise<T> {
    /// Complete this promise with the given value. This will resolve the associated [`Future`]s
    /// and run every attached callback on the _current_ thread.
    ///
    /// Returns `false` (and discards `value`) if the slot was already completed.
    pub fn complete(&self, value: T) -> bool {
        let mut state = self.inner.state.lock();
        let callbacks = match &mut *state {
            Completed(_) => return false,
            Pending(callbacks) => take(callbacks),
        };

        *state = Completed(value.clone());
        drop(state);
        self.inner.cond.notify_all();

        // Callbacks run without the lock held so they are free to observe this slot again.
        for callback in callbacks {
            (callback)(value.clone());
        }

        true
    }
}

impl<T> Future<T> {
    /// Returns a future which is already resolved to `value`.
    pub fn ready(value: T) -> Self {
        let inner = Arc::new(Inner {
            cond: Condvar::new(),
            state: Mutex::new(Completed(value)),
        });

        Future { inner }
    }

    /// Query whether the value is available without blocking.
    pub fn is_ready(&self) -> bool {
        matches!(&*self.inner.state.lock(), Completed(_))
    }

    /// Calls `fun` with a reference to the value if it is available.
    pub fn inspect<F, R>(&self, fun: F) -> Option<R>
    where
        F: FnOnce(&T) -> R,
    {
        match &*self.inner.state.lock() {
            Completed(value) => Some((fun)(value)),
            Pending(_) => None,
        }
    }
}

impl<T: Clone> Future<T> {
    /// Returns a copy of the value if it is available.
    pub fn try_get(&self) -> Option<T> {
        self.inspect(T::clone)
    }

    /// Blocks the caller until the value of `T` is available.
    pub fn wait(&self) -> T {
        let mut state = self.inner.state.lock();
        loop {
            match &*state {
                Completed(value) => return value.clone(),
                Pending(_) => self.inner.cond.wait(&mut state),
            }
        }
    }

    /// Blocks the caller until the value of `T` is available or `timeout` has elapsed.
    ///
    /// Returns `None` on timeout. The producer is not affected, only the wait is aborted.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.inner.state.lock();

        loop {
            match &*state {
                Completed(value) => return Some(value.clone()),
                Pending(_) => match deadline {
                    Some(deadline) => {
                        if self.inner.cond.wait_until(&mut state, deadline).timed_out() {
                            return state_value(&*state);
                        }
                    }
                    None => self.inner.cond.wait(&mut state),
                },
            }
        }
    }

    /// Attach a callback which will be called with `T` when the value is available.
    ///
    /// Note that there are two scenarios:
    /// * The callback is called _immediately_ in the _current_ thread if the value is available.
    /// * The callback is called _later_ in a _different_ thread when [`Promise::complete`] is called.
    ///
    /// Due to the second case, it is important that the provided callback does not block since
    /// that would stall the producer's thread.
    pub fn attach_callback<F>(&self, fun: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        let value = match &mut *state {
            Pending(callbacks) => {
                callbacks.push(Box::new(fun));
                return;
            }
            Completed(value) => value.clone(),
        };

        drop(state);
        (fun)(value);
    }

    /// Maps an [`Future<T>`] to [`Future<R>`] using the supplied function `FnOnce(T) -> R`.
    ///
    /// `fun` runs on whichever thread resolves this future.
    pub fn map<F, R>(&self, fun: F) -> Future<R>
    where
        F: FnOnce(T) -> R + Send + 'static,
        R: Clone + Send + 'static,
    {
        let (promise, future) = Promise::new();
        self.attach_callback(move |value| {
            promise.complete(fun(value));
        });

        future
    }
}

fn state_value<T: Clone>(state: &State<T>) -> Option<T> {
    match state {
        Completed(value) => Some(value.clone()),
        Pending(_) => None,
    }
}
