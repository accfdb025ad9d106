//! `SharedManager` — babysits the `SharedHash`/`SharedDeque` instances built
//! on top of one connection. Owns nothing about the wire itself; it's just a
//! convenience factory wrapping the `CommandSink`/`ChannelPublisher` seams.
//!
//! Ported from `original_source/include/qclient/shared/SharedManager.hh`.

use std::sync::Arc;

use crate::flusher::background::CommandSink;
use crate::shared::communicator::ChannelPublisher;
use crate::shared::deque::SharedDeque;
use crate::shared::hash::{PersistentSharedHash, TransientSharedHash};
use crate::shared::hash_subscription::SharedHashSubscriber;

/// Don't destroy this before the hashes/deques it created — they hold a
/// reference to the same sink, not to the manager itself, but conceptually
/// their lifetime is tied to it the way the original header's comment warns.
pub struct SharedManager {
    sink: Arc<dyn CommandSink>,
    publisher: Arc<dyn ChannelPublisher>,
}

impl SharedManager {
    pub fn new(sink: Arc<dyn CommandSink>, publisher: Arc<dyn ChannelPublisher>) -> Self {
        SharedManager { sink, publisher }
    }

    pub fn make_persistent_shared_hash(
        &self,
        key: impl Into<String>,
        subscriber: Option<Arc<SharedHashSubscriber>>,
    ) -> PersistentSharedHash {
        PersistentSharedHash::new(key, self.sink.clone(), subscriber)
    }

    pub fn make_transient_shared_hash(&self, channel: impl Into<String>) -> TransientSharedHash {
        TransientSharedHash::new(channel, self.publisher.clone())
    }

    pub fn make_shared_deque(&self, key: impl Into<String>) -> SharedDeque {
        SharedDeque::new(key, self.sink.clone())
    }

    /// Used by the shared data structures above to publish their own
    /// modifications; callers outside this module should go through one of
    /// the `make_*` constructors instead.
    pub fn publish(&self, channel: &str, payload: &[u8]) {
        self.publisher.publish(channel, payload);
    }
}
