//! A minimal blocking future/promise pair.
//!
//! The original qclient ships its own light `QFuture`/`QPromise` rather than
//! pulling in a full future library, since the whole client is synchronous
//! and thread-driven rather than built on an executor. We do the same here:
//! no `std::future::Future` impl, just a value that becomes available once,
//! observable either by blocking or by polling.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

struct Shared<T> {
    value: Mutex<Option<T>>,
    ready: Condvar,
}

/// The consumer side, returned to callers of `stage()`.
pub struct QFuture<T> {
    shared: Arc<Shared<T>>,
}

/// The producer side, held by the connection core until the matching reply
/// arrives (or the request is abandoned).
pub struct QPromise<T> {
    shared: Arc<Shared<T>>,
}

pub fn pair<T>() -> (QPromise<T>, QFuture<T>) {
    let shared = Arc::new(Shared {
        value: Mutex::new(None),
        ready: Condvar::new(),
    });
    (
        QPromise {
            shared: shared.clone(),
        },
        QFuture { shared },
    )
}

impl<T> QPromise<T> {
    /// Deliver the value. A promise dropped without a call leaves its
    /// future blocked forever — callers that need timeout semantics use
    /// `QFuture::wait_timeout` or race against a hard deadline elsewhere
    /// (the vault, the retry strategy).
    pub fn set_value(self, value: T) {
        let mut guard = self.shared.value.lock().unwrap();
        *guard = Some(value);
        self.shared.ready.notify_all();
    }
}

impl<T: Clone> QFuture<T> {
    /// Block until the value is available.
    pub fn wait(&self) -> T {
        let mut guard = self.shared.value.lock().unwrap();
        loop {
            if let Some(v) = guard.as_ref() {
                return v.clone();
            }
            guard = self.shared.ready.wait(guard).unwrap();
        }
    }

    /// Block for at most `timeout`, returning `None` if the value never
    /// arrived in time.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let guard = self.shared.value.lock().unwrap();
        if let Some(v) = guard.as_ref() {
            return Some(v.clone());
        }
        let (guard, _) = self.shared.ready.wait_timeout(guard, timeout).unwrap();
        guard.as_ref().cloned()
    }

    pub fn is_ready(&self) -> bool {
        self.shared.value.lock().unwrap().is_some()
    }
}

impl<T> Clone for QFuture<T> {
    fn clone(&self) -> Self {
        QFuture {
            shared: self.shared.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_blocks_until_set() {
        let (promise, future) = pair::<i32>();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            promise.set_value(7);
        });
        assert_eq!(future.wait(), 7);
        handle.join().unwrap();
    }

    #[test]
    fn wait_timeout_expires_without_value() {
        let (_promise, future) = pair::<i32>();
        assert_eq!(future.wait_timeout(Duration::from_millis(10)), None);
    }
}
