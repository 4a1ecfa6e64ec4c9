//! Single-assignment completion cell with callbacks.

use std::sync::Arc;
use parking_lot::{Mutex, Condvar};


/// Cloneable handle to a value which will be produced exactly once, possibly
/// on another thread.
///
/// Consumers may either block on `wait` (worker threads only), poll with
/// `try_get`, or register an `on_ready` callback. Callbacks run outside the
/// internal lock, on whichever thread calls `complete`, so re-entrant use of
/// the promise from a callback is fine.
pub struct Promise<T>(Arc<State<T>>);

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise(Arc::clone(&self.0))
    }
}

struct State<T> {
    inner: Mutex<Inner<T>>,
    cond: Condvar,
}

struct Inner<T> {
    value: Option<Arc<T>>,
    callbacks: Vec<Box<dyn FnOnce(&T) + Send>>,
}

impl<T: Send + Sync + 'static> Promise<T> {
    /// Construct pending.
    pub fn new() -> Self {
        Promise(Arc::new(State {
            inner: Mutex::new(Inner { value: None, callbacks: Vec::new() }),
            cond: Condvar::new(),
        }))
    }

    /// Construct already completed.
    pub fn ready(value: T) -> Self {
        let promise = Self::new();
        promise.complete(value);
        promise
    }

    /// Supply the value and fire pending callbacks. Later completions are
    /// discarded, first writer wins.
    pub fn complete(&self, value: T) {
        let (value, callbacks) = {
            let mut inner = self.0.inner.lock();
            if inner.value.is_some() {
                return;
            }
            let value = Arc::new(value);
            inner.value = Some(Arc::clone(&value));
            (value, std::mem::take(&mut inner.callbacks))
        };
        self.0.cond.notify_all();
        for callback in callbacks {
            callback(&value);
        }
    }

    /// Whether a value has been supplied.
    pub fn is_done(&self) -> bool {
        self.0.inner.lock().value.is_some()
    }

    /// Run `f` with the value once it exists. Runs immediately if already
    /// completed.
    pub fn on_ready(&self, f: impl FnOnce(&T) + Send + 'static) {
        let value = {
            let mut inner = self.0.inner.lock();
            match inner.value {
                Some(ref value) => Arc::clone(value),
                None => {
                    inner.callbacks.push(Box::new(f));
                    return;
                }
            }
        };
        f(&value);
    }

    /// Park until the value exists. Must not be called from the thread that
    /// is responsible for completing this promise.
    pub fn wait_ref(&self) -> Arc<T> {
        let mut inner = self.0.inner.lock();
        loop {
            if let Some(ref value) = inner.value {
                return Arc::clone(value);
            }
            self.0.cond.wait(&mut inner);
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Promise<T> {
    /// Non-blocking read of the value, if completed.
    pub fn try_get(&self) -> Option<T> {
        self.0.inner.lock().value.as_deref().cloned()
    }

    /// Park until the value exists, then clone it out.
    pub fn wait(&self) -> T {
        (*self.wait_ref()).clone()
    }
}

impl<T: Send + Sync + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}
