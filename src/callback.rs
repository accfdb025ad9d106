//! `CallbackExecutor` — runs user-supplied reply/message callbacks off the
//! reader thread, so a slow or misbehaving callback can never stall the
//! socket read loop (Design Note: reader thread never calls user code
//! directly).
//!
//! Double-buffered: the reader thread appends to the "incoming" buffer
//! under a short lock and moves on; a dedicated executor thread swaps the
//! buffers and runs whatever accumulated, without holding the lock while
//! user code executes.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Inner {
    pending: Mutex<Vec<Job>>,
    signal: Condvar,
    shutdown: Mutex<bool>,
}

pub struct CallbackExecutor {
    inner: Arc<Inner>,
    worker: Option<JoinHandle<()>>,
}

impl CallbackExecutor {
    pub fn new() -> Self {
        let inner = Arc::new(Inner {
            pending: Mutex::new(Vec::new()),
            signal: Condvar::new(),
            shutdown: Mutex::new(false),
        });

        let worker_inner = inner.clone();
        let worker = thread::Builder::new()
            .name("callback-executor".into())
            .spawn(move || Self::run(worker_inner))
            .expect("spawn callback-executor thread");

        CallbackExecutor {
            inner,
            worker: Some(worker),
        }
    }

    fn run(inner: Arc<Inner>) {
        loop {
            let batch = {
                let mut pending = inner.pending.lock().unwrap();
                while pending.is_empty() && !*inner.shutdown.lock().unwrap() {
                    pending = inner.signal.wait(pending).unwrap();
                }
                if pending.is_empty() {
                    return;
                }
                std::mem::take(&mut *pending)
            };

            for job in batch {
                job();
            }
        }
    }

    /// Enqueue a callback for later execution. Never blocks on the
    /// callback itself running.
    pub fn submit<F: FnOnce() + Send + 'static>(&self, job: F) {
        let mut pending = self.inner.pending.lock().unwrap();
        pending.push(Box::new(job));
        self.inner.signal.notify_one();
    }
}

impl Drop for CallbackExecutor {
    fn drop(&mut self) {
        *self.inner.shutdown.lock().unwrap() = true;
        self.inner.signal.notify_all();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Default for CallbackExecutor {
    fn default() -> Self {
        CallbackExecutor::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn submitted_jobs_run_off_the_calling_thread() {
        let executor = CallbackExecutor::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let counter = counter.clone();
            executor.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        let mut waited = Duration::ZERO;
        while counter.load(Ordering::SeqCst) < 10 && waited < Duration::from_secs(1) {
            thread::sleep(Duration::from_millis(5));
            waited += Duration::from_millis(5);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
}
