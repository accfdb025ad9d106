//! `PendingRequestVault` — tracks in-flight `Communicator` requests, in
//! submission order, so the retry loop always knows which one is oldest and
//! due for a resend, and a hard deadline can expire requests that have been
//! outstanding too long.
//!
//! Ported from `original_source/include/qclient/shared/PendingRequestVault.hh`
//! and `src/shared/PendingRequestVault.cc`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex};
use std::time::Instant;

use uuid::Uuid;

use crate::future::{pair, QFuture, QPromise};

pub type RequestId = String;

/// The reply a `Communicator` request is ultimately satisfied with.
#[derive(Debug, Clone)]
pub struct CommunicatorReply {
    pub status: i32,
    pub contents: Vec<u8>,
}

struct Item {
    start: Instant,
    last_retry: Instant,
    channel: String,
    contents: Vec<u8>,
    promise: Option<QPromise<CommunicatorReply>>,
}

pub struct InsertOutcome {
    pub id: RequestId,
    pub future: QFuture<CommunicatorReply>,
}

struct State {
    pending: HashMap<RequestId, Item>,
    next_to_retry: VecDeque<RequestId>,
    blocking_mode: bool,
}

pub struct PendingRequestVault {
    state: Mutex<State>,
    cv: Condvar,
}

impl Default for PendingRequestVault {
    fn default() -> Self {
        PendingRequestVault::new()
    }
}

impl PendingRequestVault {
    pub fn new() -> Self {
        PendingRequestVault {
            state: Mutex::new(State {
                pending: HashMap::new(),
                next_to_retry: VecDeque::new(),
                blocking_mode: true,
            }),
            cv: Condvar::new(),
        }
    }

    pub fn insert(&self, channel: &str, contents: &[u8], timepoint: Instant) -> InsertOutcome {
        let id = Uuid::new_v4().to_string();
        let (promise, future) = pair();

        let mut state = self.state.lock().unwrap();
        state.pending.insert(
            id.clone(),
            Item {
                start: timepoint,
                last_retry: timepoint,
                channel: channel.to_string(),
                contents: contents.to_vec(),
                promise: Some(promise),
            },
        );
        state.next_to_retry.push_back(id.clone());
        self.cv.notify_all();

        InsertOutcome { id, future }
    }

    pub fn satisfy(&self, id: &RequestId, reply: CommunicatorReply) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(mut item) = state.pending.remove(id) else {
            return false;
        };
        state.next_to_retry.retain(|rid| rid != id);
        if let Some(promise) = item.promise.take() {
            promise.set_value(reply);
        }
        true
    }

    pub fn size(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    pub fn get_earliest_retry(&self) -> Option<Instant> {
        let state = self.state.lock().unwrap();
        let front_id = state.next_to_retry.front()?;
        state.pending.get(front_id).map(|item| item.last_retry)
    }

    fn drop_front(state: &mut State) {
        if let Some(front_id) = state.next_to_retry.pop_front() {
            state.pending.remove(&front_id);
        }
    }

    /// Expire every request whose ORIGINAL submission time is at or before
    /// `deadline`. Retries don't reset this clock — a request that's been
    /// outstanding since before the deadline is dropped regardless of how
    /// recently it was last retried.
    pub fn expire(&self, deadline: Instant) -> usize {
        let mut state = self.state.lock().unwrap();
        let mut expired = 0;

        loop {
            let should_drop = match state.next_to_retry.front() {
                Some(front_id) => state
                    .pending
                    .get(front_id)
                    .map(|item| item.start <= deadline)
                    .unwrap_or(true),
                None => false,
            };

            if !should_drop {
                break;
            }

            Self::drop_front(&mut state);
            expired += 1;
        }

        expired
    }

    /// Pop the oldest item, requeue it at the back with an updated retry
    /// timestamp, and return its channel/contents/id for resubmission.
    pub fn retry_front_item(&self, now: Instant) -> Option<(String, Vec<u8>, RequestId)> {
        let mut state = self.state.lock().unwrap();
        let front_id = state.next_to_retry.pop_front()?;
        let item = state.pending.get_mut(&front_id)?;
        item.last_retry = now;
        let result = (item.channel.clone(), item.contents.clone(), front_id.clone());
        state.next_to_retry.push_back(front_id);
        Some(result)
    }

    pub fn set_blocking_mode(&self, val: bool) {
        let mut state = self.state.lock().unwrap();
        state.blocking_mode = val;
        self.cv.notify_all();
    }

    pub fn block_until_non_empty(&self) {
        let mut state = self.state.lock().unwrap();
        while state.blocking_mode && state.pending.is_empty() {
            state = self.cv.wait(state).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn insert_then_satisfy_resolves_future() {
        let vault = PendingRequestVault::new();
        let outcome = vault.insert("channel", b"payload", Instant::now());
        assert_eq!(vault.size(), 1);

        vault.satisfy(
            &outcome.id,
            CommunicatorReply {
                status: 0,
                contents: b"ack".to_vec(),
            },
        );
        assert_eq!(vault.size(), 0);
        let reply = outcome.future.wait_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(reply.contents, b"ack");
    }

    #[test]
    fn expire_drops_only_requests_older_than_deadline() {
        let vault = PendingRequestVault::new();
        let old = Instant::now();
        std::thread::sleep(Duration::from_millis(5));
        let deadline = Instant::now();
        std::thread::sleep(Duration::from_millis(5));

        let outcome_old = vault.insert("c", b"old", old);
        let outcome_new = vault.insert("c", b"new", Instant::now());

        let expired = vault.expire(deadline);
        assert_eq!(expired, 1);
        assert_eq!(vault.size(), 1);
        assert!(!outcome_old.future.is_ready() || outcome_old.future.wait_timeout(Duration::ZERO).is_none());
        let _ = outcome_new;
    }

    #[test]
    fn retry_front_item_requeues_at_back() {
        let vault = PendingRequestVault::new();
        vault.insert("c", b"first", Instant::now());
        vault.insert("c", b"second", Instant::now());

        let (channel, contents, _id) = vault.retry_front_item(Instant::now()).unwrap();
        assert_eq!(channel, "c");
        assert_eq!(contents, b"first");

        // After requeueing "first" goes to the back, so "second" is now front.
        let (_, contents2, _) = vault.retry_front_item(Instant::now()).unwrap();
        assert_eq!(contents2, b"second");
    }
}
