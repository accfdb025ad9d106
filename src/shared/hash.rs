//! Shared hashes: a map synchronized between clients via versioned pub/sub
//! updates. `PersistentSharedHash` and `TransientSharedHash` implement the
//! common [`SharedHash`] surface as siblings, not as a base/derived pair —
//! their consistency guarantees are different enough that forcing a shared
//! base class (as the original's inheritance-free design already hints at)
//! would only blur the distinction.
//!
//! Ported from `original_source/include/qclient/shared/PersistentSharedHash.hh`
//! and `TransientSharedHash.hh`.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::flusher::background::CommandSink;
use crate::future::{pair, QFuture};
use crate::request::EncodedRequest;
use crate::shared::communicator::ChannelPublisher;
use crate::shared::hash_subscription::{SharedHashSubscriber, SharedHashUpdate};
use crate::shared::serialization::serialize_batch;
use crate::types::{null_reply, Reply};

/// An empty value is this hash family's tombstone: `HSET field ""` and
/// `del(field)` are the same wire operation. Matches the field-deletion
/// convention `SharedSerialization`'s batch format assumes implicitly.
const TOMBSTONE: &str = "";

pub trait SharedHash: Send + Sync {
    fn get(&self, field: &str) -> Option<String>;
    fn get_keys(&self) -> HashSet<String>;
    fn set(&self, field: &str, value: &str) -> QFuture<Reply>;
    fn set_batch(&self, values: &BTreeMap<String, String>) -> QFuture<Reply>;
    fn del(&self, field: &str) -> QFuture<Reply>;
}

/// Contents are durably stored server-side; QuarkDB is the single source of
/// truth and pushes versioned revisions to every subscriber. Local reads are
/// eventually consistent.
pub struct PersistentSharedHash {
    key: String,
    sink: Arc<dyn CommandSink>,
    contents: RwLock<BTreeMap<String, String>>,
    current_version: AtomicU64,
    subscriber: Option<Arc<SharedHashSubscriber>>,
}

impl PersistentSharedHash {
    pub fn new(
        key: impl Into<String>,
        sink: Arc<dyn CommandSink>,
        subscriber: Option<Arc<SharedHashSubscriber>>,
    ) -> Self {
        PersistentSharedHash {
            key: key.into(),
            sink,
            contents: RwLock::new(BTreeMap::new()),
            current_version: AtomicU64::new(0),
            subscriber,
        }
    }

    pub fn current_version(&self) -> u64 {
        self.current_version.load(Ordering::Acquire)
    }

    /// Apply an incremental revision. Returns `false` if `revision` isn't
    /// the immediate successor of our current version — the caller should
    /// then call [`resilver`](Self::resilver) with the full contents.
    pub fn feed_revision(&self, revision: u64, updates: &BTreeMap<String, String>) -> bool {
        if revision != self.current_version.load(Ordering::Acquire) + 1 {
            return false;
        }

        let mut contents = self.contents.write().unwrap();
        for (field, value) in updates {
            self.apply_single(&mut contents, field, value);
        }
        self.current_version.store(revision, Ordering::Release);
        true
    }

    fn apply_single(&self, contents: &mut BTreeMap<String, String>, field: &str, value: &str) {
        if value == TOMBSTONE {
            contents.remove(field);
        } else {
            contents.insert(field.to_string(), value.to_string());
        }
        if let Some(subscriber) = &self.subscriber {
            subscriber.feed_update(SharedHashUpdate {
                key: field.to_string(),
                value: value.to_string(),
            });
        }
    }

    /// Flush all previous contents and replace with a freshly fetched
    /// snapshot, after `feed_revision` reports we've fallen behind.
    pub fn resilver(&self, revision: u64, new_contents: BTreeMap<String, String>) {
        *self.contents.write().unwrap() = new_contents;
        self.current_version.store(revision, Ordering::Release);
    }
}

impl SharedHash for PersistentSharedHash {
    fn get(&self, field: &str) -> Option<String> {
        self.contents.read().unwrap().get(field).cloned()
    }

    fn get_keys(&self) -> HashSet<String> {
        self.contents.read().unwrap().keys().cloned().collect()
    }

    fn set(&self, field: &str, value: &str) -> QFuture<Reply> {
        self.sink
            .submit(EncodedRequest::from_args(["HSET", &self.key, field, value]))
    }

    fn set_batch(&self, values: &BTreeMap<String, String>) -> QFuture<Reply> {
        let mut args: Vec<Vec<u8>> = vec![b"HSET".to_vec(), self.key.as_bytes().to_vec()];
        for (field, value) in values {
            args.push(field.as_bytes().to_vec());
            args.push(value.as_bytes().to_vec());
        }
        self.sink.submit(EncodedRequest::from_args(args))
    }

    fn del(&self, field: &str) -> QFuture<Reply> {
        self.sink
            .submit(EncodedRequest::from_args(["HDEL", &self.key, field]))
    }
}

/// No persistence, "meh" consistency — contents live only in memory and
/// flow solely through pub/sub, with no server-side source of truth.
/// Meant for high-volume, low-value data like heartbeats.
pub struct TransientSharedHash {
    channel: String,
    publisher: Arc<dyn ChannelPublisher>,
    contents: RwLock<BTreeMap<String, String>>,
}

impl TransientSharedHash {
    pub fn new(channel: impl Into<String>, publisher: Arc<dyn ChannelPublisher>) -> Self {
        TransientSharedHash {
            channel: channel.into(),
            publisher,
            contents: RwLock::new(BTreeMap::new()),
        }
    }

    /// Merge a batch received over the channel into the local view.
    pub fn process_incoming(&self, batch: &BTreeMap<String, String>) {
        let mut contents = self.contents.write().unwrap();
        for (field, value) in batch {
            if value == TOMBSTONE {
                contents.remove(field);
            } else {
                contents.insert(field.clone(), value.clone());
            }
        }
    }

    fn apply_and_publish(&self, batch: BTreeMap<String, String>) -> QFuture<Reply> {
        self.process_incoming(&batch);
        self.publisher.publish(&self.channel, &serialize_batch(&batch));

        let (promise, future) = pair();
        promise.set_value(null_reply());
        future
    }
}

impl SharedHash for TransientSharedHash {
    fn get(&self, field: &str) -> Option<String> {
        self.contents.read().unwrap().get(field).cloned()
    }

    fn get_keys(&self) -> HashSet<String> {
        self.contents.read().unwrap().keys().cloned().collect()
    }

    fn set(&self, field: &str, value: &str) -> QFuture<Reply> {
        let mut batch = BTreeMap::new();
        batch.insert(field.to_string(), value.to_string());
        self.apply_and_publish(batch)
    }

    fn set_batch(&self, values: &BTreeMap<String, String>) -> QFuture<Reply> {
        self.apply_and_publish(values.clone())
    }

    fn del(&self, field: &str) -> QFuture<Reply> {
        let mut batch = BTreeMap::new();
        batch.insert(field.to_string(), TOMBSTONE.to_string());
        self.apply_and_publish(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use std::sync::Mutex;

    struct EchoSink;
    impl CommandSink for EchoSink {
        fn submit(&self, _request: EncodedRequest) -> QFuture<Reply> {
            let (promise, future) = pair();
            promise.set_value(Arc::new(Value::Status("OK".into())));
            future
        }
    }

    #[test]
    fn feed_revision_rejects_non_consecutive_updates() {
        let hash = PersistentSharedHash::new("key", Arc::new(EchoSink), None);
        let mut updates = BTreeMap::new();
        updates.insert("f".to_string(), "v".to_string());

        assert!(!hash.feed_revision(2, &updates));
        assert!(hash.feed_revision(1, &updates));
        assert_eq!(hash.get("f"), Some("v".to_string()));
        assert_eq!(hash.current_version(), 1);
    }

    #[test]
    fn empty_value_deletes_field() {
        let hash = PersistentSharedHash::new("key", Arc::new(EchoSink), None);
        let mut updates = BTreeMap::new();
        updates.insert("f".to_string(), "v".to_string());
        hash.feed_revision(1, &updates);

        let mut del = BTreeMap::new();
        del.insert("f".to_string(), "".to_string());
        hash.feed_revision(2, &del);

        assert_eq!(hash.get("f"), None);
    }

    struct RecordingPublisher {
        published: Mutex<Vec<Vec<u8>>>,
    }
    impl ChannelPublisher for RecordingPublisher {
        fn publish(&self, _channel: &str, payload: &[u8]) {
            self.published.lock().unwrap().push(payload.to_vec());
        }
    }

    #[test]
    fn transient_hash_applies_locally_and_publishes() {
        let publisher = Arc::new(RecordingPublisher {
            published: Mutex::new(Vec::new()),
        });
        let hash = TransientSharedHash::new("chan", publisher.clone());
        hash.set("f", "v").wait();
        assert_eq!(hash.get("f"), Some("v".to_string()));
        assert_eq!(publisher.published.lock().unwrap().len(), 1);
    }
}
