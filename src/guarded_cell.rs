use std::sync::{Mutex, PoisonError};

/// A value that can be read and modified from any thread.
///
/// All access goes through [`GuardedCell::with`], which holds the lock for the duration of the
/// closure only. The closure must not call back into the same cell and should not call out to
/// user-provided collaborators.
#[derive(Debug, Default)]
pub struct GuardedCell<T> {
    value: Mutex<T>,
}

impl<T> GuardedCell<T> {
    pub fn new(value: T) -> Self {
        GuardedCell {
            value: Mutex::new(value),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        // The lock is poisoned only if a previous closure panicked. Data inside is still
        // consistent for our use (plain maps), so we keep going instead of crashing the app.
        let mut guard = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}
