//! `ConnectionCore` — the state a single connection attempt owns: the
//! staged-request queue, the handshake state machine, and the
//! pending-futures bookkeeping that ties a reply back to its request.
//!
//! Ported from `original_source/include/qclient/QClient.hh`'s private state
//! plus the `WriterThread`/reader-side dispatch described in
//! `original_source/src/WriterThread.{hh,cc}` — the original splits "what to
//! write next" and "what to acknowledge next" across a `WriterThread` and
//! the reply-dispatch code in `QClient.cc`; we fold both into one type
//! guarded by a single lock, since nothing here is hot enough to need the
//! original's push/pop mutex split (see `queue.rs` for where that split *is*
//! kept, at the `RequestQueue` level).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::backpressure::Backpressure;
use crate::future::{pair, QFuture, QPromise};
use crate::handshake::{Handshake, HandshakeStatus};
use crate::request::{EncodedRequest, RequestId};
use crate::types::{null_reply, Reply};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreState {
    Handshaking,
    Open,
    Draining,
}

/// An entry staged into the queue: the wire bytes, how many interim replies
/// to discard before the real one, and the promise the eventual
/// reply goes to. The sentinel entry (`seq == 0`) never carries a promise.
struct QueuedEntry {
    seq: u64,
    #[allow(dead_code)]
    id: RequestId,
    encoded: EncodedRequest,
    multi_size: usize,
    promise: Mutex<Option<QPromise<Reply>>>,
}

impl Default for QueuedEntry {
    fn default() -> Self {
        QueuedEntry {
            seq: 0,
            id: 0,
            encoded: EncodedRequest::new(Vec::new()),
            multi_size: 0,
            promise: Mutex::new(None),
        }
    }
}

struct Inner {
    state: CoreState,
    queue: crate::queue::RequestQueue<QueuedEntry>,
    pending_handshake_frame: Option<EncodedRequest>,
    write_cursor: u64,
    /// `< 0`: not currently discarding interim replies. `>= 0`: remaining
    /// interim replies still to discard before the real one.
    multi_countdown: i64,
}

pub struct ConnectionCore {
    inner: Mutex<Inner>,
    cv: Condvar,
    blocking: AtomicBool,
    handshake: Mutex<Box<dyn Handshake>>,
    next_seq: AtomicU64,
    backpressure: Arc<Backpressure>,
}

impl ConnectionCore {
    pub fn new(mut handshake: Box<dyn Handshake>, backpressure: Arc<Backpressure>) -> Self {
        let first_frame = EncodedRequest::from_args(handshake.provide_handshake());

        ConnectionCore {
            inner: Mutex::new(Inner {
                state: CoreState::Handshaking,
                queue: crate::queue::RequestQueue::new(),
                pending_handshake_frame: Some(first_frame),
                write_cursor: 0,
                multi_countdown: -1,
            }),
            cv: Condvar::new(),
            blocking: AtomicBool::new(true),
            handshake: Mutex::new(handshake),
            next_seq: AtomicU64::new(1),
            backpressure,
        }
    }

    pub fn state(&self) -> CoreState {
        self.inner.lock().unwrap().state
    }

    /// Stage a request for sending, applying backpressure first.
    /// `multi_size` is the number of interim "QUEUED"-style replies the
    /// real reply for this request is preceded by (0 outside a
    /// transaction).
    pub fn stage(&self, encoded: EncodedRequest, multi_size: usize) -> QFuture<Reply> {
        self.backpressure.acquire();

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (promise, future) = pair();
        let entry = QueuedEntry {
            seq,
            id: seq,
            encoded,
            multi_size,
            promise: Mutex::new(Some(promise)),
        };

        {
            let mut inner = self.inner.lock().unwrap();
            inner.queue.push_back(entry);
        }
        self.cv.notify_all();

        future
    }

    /// The next frame the writer thread should send, blocking until one is
    /// available (or blocking mode is switched off, in which case `None`
    /// means "nothing to write right now").
    pub fn get_next_to_write(&self) -> Option<EncodedRequest> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.state == CoreState::Handshaking {
                if let Some(frame) = inner.pending_handshake_frame.take() {
                    return Some(frame);
                }
            } else {
                let cursor = inner.write_cursor;
                let next = inner
                    .queue
                    .iter()
                    .find(|e| e.seq > cursor)
                    .map(|e| (e.seq, e.encoded.clone()));

                if let Some((seq, encoded)) = next {
                    inner.write_cursor = seq;
                    return Some(encoded);
                }
            }

            if !self.blocking.load(Ordering::Acquire) {
                return None;
            }
            inner = self.cv.wait_timeout(inner, Duration::from_millis(100)).unwrap().0;
        }
    }

    /// Feed in one parsed reply. Returns `false` when the connection must be
    /// torn down: an invalid handshake reply, or more replies than we ever
    /// sent requests for.
    pub fn consume_response(&self, reply: &Reply) -> bool {
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            CoreState::Handshaking => {
                let status = self.handshake.lock().unwrap().validate_response(reply);
                match status {
                    HandshakeStatus::ValidComplete => {
                        inner.state = CoreState::Open;
                        true
                    }
                    HandshakeStatus::ValidIncomplete => {
                        let frame =
                            EncodedRequest::from_args(self.handshake.lock().unwrap().provide_handshake());
                        inner.pending_handshake_frame = Some(frame);
                        drop(inner);
                        self.cv.notify_all();
                        true
                    }
                    HandshakeStatus::Invalid => false,
                }
            }
            CoreState::Open | CoreState::Draining => {
                if inner.queue.is_empty() {
                    return false;
                }

                if inner.multi_countdown < 0 {
                    let multi_size = inner.queue.front().multi_size as i64;
                    if multi_size > 0 {
                        inner.multi_countdown = multi_size;
                    }
                }

                if inner.multi_countdown > 0 {
                    inner.multi_countdown -= 1;
                    return true;
                }
                if inner.multi_countdown == 0 {
                    inner.multi_countdown = -1;
                }

                let entry = inner.queue.pop_front().expect("checked non-empty above");
                drop(inner);

                if let Some(promise) = entry.promise.lock().unwrap().take() {
                    promise.set_value(reply.clone());
                }
                self.backpressure.release();
                true
            }
        }
    }

    /// Wake up any thread blocked in `get_next_to_write`; used on shutdown.
    pub fn set_blocking_mode(&self, blocking: bool) {
        self.blocking.store(blocking, Ordering::Release);
        self.cv.notify_all();
    }

    /// Resolve every un-acknowledged request with a null reply and reset
    /// the queue invariant (called once a connection is irrecoverably
    /// broken and the retry strategy gives up).
    pub fn clear_all_pending(&self) {
        let mut inner = self.inner.lock().unwrap();
        while let Some(entry) = inner.queue.pop_front() {
            if let Some(promise) = entry.promise.lock().unwrap().take() {
                promise.set_value(null_reply());
            }
            self.backpressure.release();
        }
        inner.multi_countdown = -1;
        inner.write_cursor = 0;
    }

    /// A fresh connection was established: replay every un-acknowledged
    /// request from the start, and re-run the handshake.
    pub fn reconnection(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.write_cursor = 0;
        inner.multi_countdown = -1;
        inner.state = CoreState::Handshaking;

        let mut handshake = self.handshake.lock().unwrap();
        handshake.restart();
        inner.pending_handshake_frame = Some(EncodedRequest::from_args(handshake.provide_handshake()));
        drop(handshake);
        drop(inner);
        self.cv.notify_all();
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::PingHandshake;
    use crate::backpressure::BackpressureStrategy;
    use crate::types::Value;

    fn open_core() -> ConnectionCore {
        let core = ConnectionCore::new(
            Box::new(PingHandshake::default()),
            Arc::new(Backpressure::new(BackpressureStrategy::Infinite)),
        );
        assert_eq!(core.state(), CoreState::Handshaking);
        let frame = core.get_next_to_write().unwrap();
        assert!(frame.bytes.starts_with(b"*2\r\n$4\r\nPING"));
        assert!(core.consume_response(&Arc::new(Value::Data(
            b"qclient-connection-initialization".to_vec()
        ))));
        assert_eq!(core.state(), CoreState::Open);
        core
    }

    #[test]
    fn replies_resolve_requests_in_order() {
        let core = open_core();
        let f1 = core.stage(EncodedRequest::from_args(["GET", "a"]), 0);
        let f2 = core.stage(EncodedRequest::from_args(["GET", "b"]), 0);

        assert!(core.consume_response(&Arc::new(Value::Status("first".into()))));
        assert!(core.consume_response(&Arc::new(Value::Status("second".into()))));

        assert_eq!(f1.wait().as_status(), Some("first"));
        assert_eq!(f2.wait().as_status(), Some("second"));
    }

    #[test]
    fn unexpected_extra_reply_breaks_the_connection() {
        let core = open_core();
        assert!(!core.consume_response(&Arc::new(Value::Status("unsolicited".into()))));
    }

    #[test]
    fn multi_size_discards_interim_replies_before_resolving() {
        let core = open_core();
        let future = core.stage(EncodedRequest::from_args(["EXEC"]), 2);

        assert!(core.consume_response(&Arc::new(Value::Status("QUEUED".into()))));
        assert!(!future.is_ready());
        assert!(core.consume_response(&Arc::new(Value::Status("QUEUED".into()))));
        assert!(!future.is_ready());
        assert!(core.consume_response(&Arc::new(Value::Array(vec![]))));

        assert!(matches!(future.wait().as_ref(), Value::Array(v) if v.is_empty()));
    }

    #[test]
    fn clear_all_pending_resolves_with_null_reply() {
        let core = open_core();
        let future = core.stage(EncodedRequest::from_args(["GET", "a"]), 0);
        core.clear_all_pending();
        assert!(matches!(future.wait().as_ref(), Value::Nil));
    }

    #[test]
    fn reconnection_resets_write_cursor_to_replay_unacked_requests() {
        let core = open_core();
        core.stage(EncodedRequest::from_args(["GET", "a"]), 0);
        let _ = core.get_next_to_write(); // consumes the staged request

        core.reconnection();
        assert_eq!(core.state(), CoreState::Handshaking);
        // The handshake frame comes first again...
        let frame = core.get_next_to_write().unwrap();
        assert!(frame.bytes.starts_with(b"*2\r\n$4\r\nPING"));
    }
}
