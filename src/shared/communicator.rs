//! `Communicator` — point-to-point request/response messaging between two
//! clients, with the server acting as a relay over `PUBLISH`/pub-sub.
//! Retries with backoff, and a hard deadline past which a request gives up.
//!
//! Ported from `original_source/include/qclient/shared/Communicator.hh` and
//! `src/shared/Communicator.cc`.

use std::time::{Duration, Instant};

use super::serialization::{parse_communicator_reply, serialize_communicator_request};
use super::vault::{CommunicatorReply, PendingRequestVault, RequestId};
use crate::future::QFuture;

/// The seam `Communicator` publishes requests through — implemented by
/// whatever wraps the underlying connection's `PUBLISH` command.
pub trait ChannelPublisher: Send + Sync {
    fn publish(&self, channel: &str, payload: &[u8]);
}

pub struct Communicator {
    channel: String,
    publisher: Box<dyn ChannelPublisher>,
    vault: PendingRequestVault,
    retry_interval: Duration,
    hard_deadline: Duration,
}

impl Communicator {
    pub fn new(channel: impl Into<String>, publisher: Box<dyn ChannelPublisher>) -> Self {
        Communicator {
            channel: channel.into(),
            publisher,
            vault: PendingRequestVault::new(),
            retry_interval: Duration::from_secs(5),
            hard_deadline: Duration::from_secs(600),
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_hard_deadline(mut self, deadline: Duration) -> Self {
        self.hard_deadline = deadline;
        self
    }

    /// Issue a request, returning its id and a future for the eventual
    /// reply.
    pub fn issue(&self, contents: &[u8]) -> (RequestId, QFuture<CommunicatorReply>) {
        let outcome = self.vault.insert(&self.channel, contents, Instant::now());
        let wire = serialize_communicator_request(&outcome.id, contents);
        self.publisher.publish(&self.channel, &wire);
        (outcome.id, outcome.future)
    }

    /// Expire anything past the hard deadline, then resend the oldest item
    /// still due a retry. Returns `true` if a retry was actually sent.
    /// Intended to be called periodically from a driving thread.
    pub fn run_next_to_retry(&self) -> bool {
        let deadline = Instant::now()
            .checked_sub(self.hard_deadline)
            .unwrap_or_else(Instant::now);
        self.vault.expire(deadline);

        let Some(earliest_retry) = self.vault.get_earliest_retry() else {
            return false;
        };

        if earliest_retry + self.retry_interval > Instant::now() {
            return false;
        }

        let Some((channel, contents, id)) = self.vault.retry_front_item(Instant::now()) else {
            return false;
        };

        let wire = serialize_communicator_request(&id, &contents);
        self.publisher.publish(&channel, &wire);
        true
    }

    /// Feed in a pub/sub message received on our channel. Non-matching or
    /// malformed payloads are ignored.
    pub fn process_incoming(&self, payload: &[u8]) {
        if let Some((uuid, reply)) = parse_communicator_reply(payload) {
            self.vault.satisfy(&uuid, reply);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.vault.size()
    }
}
