//! C5 — `RequestQueue`: the sentinel-front queue staged requests travel
//! through between the API caller, the writer thread, and the reader
//! thread's acknowledgement bookkeeping.
//!
//! Ported from `original_source/src/RequestQueue.hh`. The queue is never
//! truly empty: construction seeds one sentinel element, and `pop_front`
//! refuses to remove the last remaining item. This lets the writer thread
//! hold a raw reference to "the last item I wrote" across a concurrent
//! `pop_front` from the acknowledgement side without that reference ever
//! dangling — the original trades one extra slot of memory for lock-free
//! iterator stability.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// The underlying deque, keeping the sentinel-front invariant.
pub struct RequestQueue<T> {
    items: VecDeque<T>,
}

impl<T: Default> Default for RequestQueue<T> {
    fn default() -> Self {
        RequestQueue::new()
    }
}

impl<T: Default> RequestQueue<T> {
    pub fn new() -> Self {
        let mut items = VecDeque::new();
        items.push_back(T::default());
        RequestQueue { items }
    }

    /// Number of real (non-sentinel) items queued.
    pub fn len(&self) -> usize {
        self.items.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push_back(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// The current front of the queue — the sentinel when nothing real is
    /// queued, otherwise the oldest real item.
    pub fn front(&self) -> &T {
        &self.items[0]
    }

    /// Remove the current front item, UNLESS it's the last remaining one.
    /// Returns `None` both when the queue only has the sentinel left and
    /// (a degenerate case) never otherwise.
    pub fn pop_front(&mut self) -> Option<T> {
        if self.items.len() <= 1 {
            return None;
        }
        self.items.pop_front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

/// `RequestQueue` plus a condvar so a writer thread can block until new
/// items are staged, mirroring the blocking `stage()` → writer-thread
/// wakeup path described below.
pub struct WaitableQueue<T: Default> {
    inner: Mutex<RequestQueue<T>>,
    not_empty: Condvar,
}

impl<T: Default> WaitableQueue<T> {
    pub fn new() -> Self {
        WaitableQueue {
            inner: Mutex::new(RequestQueue::new()),
            not_empty: Condvar::new(),
        }
    }

    pub fn push_back(&self, item: T) {
        let mut guard = self.inner.lock().unwrap();
        guard.push_back(item);
        self.not_empty.notify_one();
    }

    /// Block until at least one real item is queued, then pop and return
    /// it.
    pub fn wait_pop_front(&self) -> T {
        let mut guard = self.inner.lock().unwrap();
        while guard.is_empty() {
            guard = self.not_empty.wait(guard).unwrap();
        }
        guard.pop_front().expect("non-empty after wait")
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

impl<T: Default> Default for WaitableQueue<T> {
    fn default() -> Self {
        WaitableQueue::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_always_remains() {
        let mut q: RequestQueue<u32> = RequestQueue::new();
        assert!(q.is_empty());
        q.push_back(1);
        q.push_back(2);
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop_front(), Some(1));
        assert_eq!(q.pop_front(), Some(2));
        // The sentinel is never popped, even though the queue is logically empty.
        assert_eq!(q.pop_front(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn waitable_queue_wakes_blocked_reader() {
        use std::sync::Arc;
        use std::thread;
        use std::time::Duration;

        let q: Arc<WaitableQueue<u32>> = Arc::new(WaitableQueue::new());
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.wait_pop_front());

        thread::sleep(Duration::from_millis(20));
        q.push_back(42);
        assert_eq!(handle.join().unwrap(), 42);
    }
}
