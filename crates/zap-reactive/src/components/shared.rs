use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Thread-safe shared box for values written from outside the main loop
/// (loader threads, audio callbacks). Tracked cells and node refs are
/// single-threaded; move data across threads through one of these.
pub struct SharedBox<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> SharedBox<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(value)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        // A panicked writer leaves the value usable; keep serving it.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with exclusive access to the value.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn set(&self, value: T) {
        *self.lock() = value;
    }

    /// Swap in a new value, returning the old one.
    pub fn replace(&self, value: T) -> T {
        std::mem::replace(&mut *self.lock(), value)
    }

    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.lock().clone()
    }
}

impl<T> Clone for SharedBox<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Default> Default for SharedBox<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for SharedBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedBox").field(&*self.lock()).finish()
    }
}
