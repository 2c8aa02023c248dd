use std::ops::{Deref, DerefMut};

/// Owns a value and hands it to a fallback if the guard is dropped while still armed.
///
/// Used to make sure that work which is thrown away (for example by a pool that is shutting
/// down) still resolves whoever is waiting on it.
pub struct DropGuard<T, F: FnOnce(T)> {
    armed: Option<(T, F)>,
}

impl<T, F: FnOnce(T)> DropGuard<T, F> {
    pub fn new(value: T, fallback: F) -> Self {
        Self {
            armed: Some((value, fallback)),
        }
    }

    /// Takes the value out of the guard. The fallback is dropped without being called.
    pub fn disarm(mut self) -> T {
        match self.armed.take() {
            Some((value, _)) => value,
            None => unreachable!("guard is only disarmed once"),
        }
    }
}

impl<T, F: FnOnce(T)> Drop for DropGuard<T, F> {
    fn drop(&mut self) {
        if let Some((value, fallback)) = self.armed.take() {
            (fallback)(value);
        }
    }
}

impl<T, F: FnOnce(T)> Deref for DropGuard<T, F> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        match &self.armed {
            Some((value, _)) => value,
            None => unreachable!("guard is only disarmed once"),
        }
    }
}

impl<T, F: FnOnce(T)> DerefMut for DropGuard<T, F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.armed {
            Some((value, _)) => value,
            None => unreachable!("guard is only disarmed once"),
        }
    }
}
