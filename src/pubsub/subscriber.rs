//! `Subscriber`/`Subscription` — the user-facing pub/sub API. A
//! `Subscription` collects messages for one channel or pattern into a
//! bounded queue; dropping it unregisters automatically.
//!
//! Ported from `original_source/include/qclient/pubsub/Subscriber.hh`.
//! `AttachableQueue<Message, 50>` becomes a plain bounded `VecDeque` guarded
//! by a mutex — the "attachable" part (direct delivery without an extra
//! copy) doesn't carry over cleanly to safe Rust, so the fanout just clones
//! the `Message` per subscriber, which the original's comment already
//! warns is bounded in space regardless.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use super::base_subscriber::{BaseSubscriber, SubscriptionSink};
use super::message::Message;

const QUEUE_CAPACITY: usize = 50;

type SubscriptionId = u64;

struct SubscriptionQueue {
    messages: Mutex<VecDeque<Message>>,
}

/// A single subscription's view of incoming messages. Must not outlive the
/// `Subscriber` it came from.
pub struct Subscription {
    id: SubscriptionId,
    queue: Arc<SubscriptionQueue>,
    channel_or_pattern: String,
    subscriber: Weak<SubscriberInner>,
}

impl Subscription {
    pub fn front(&self) -> Option<Message> {
        self.queue.messages.lock().unwrap().front().cloned()
    }

    pub fn pop_front(&self) -> Option<Message> {
        self.queue.messages.lock().unwrap().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.messages.lock().unwrap().is_empty()
    }

    fn push(&self, msg: Message) {
        let mut q = self.queue.messages.lock().unwrap();
        if q.len() >= QUEUE_CAPACITY {
            q.pop_front();
        }
        q.push_back(msg);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(subscriber) = self.subscriber.upgrade() {
            subscriber.unregister(self.id, &self.channel_or_pattern);
        }
    }
}

struct SubscriberInner {
    base: BaseSubscriber,
    channel_subs: Mutex<HashMap<String, Vec<(SubscriptionId, Arc<SubscriptionQueue>)>>>,
    next_id: AtomicU64,
}

impl SubscriberInner {
    fn unregister(&self, id: SubscriptionId, channel: &str) {
        let mut map = self.channel_subs.lock().unwrap();
        if let Some(subs) = map.get_mut(channel) {
            subs.retain(|(sid, _)| *sid != id);
            if subs.is_empty() {
                map.remove(channel);
                self.base.unsubscribe(channel);
            }
        }
    }
}

/// A pub/sub client: subscribe to channels, receive delivered messages
/// through `Subscription`s.
pub struct Subscriber {
    inner: Arc<SubscriberInner>,
}

impl Subscriber {
    pub fn new(sink: Box<dyn SubscriptionSink>) -> Self {
        Subscriber {
            inner: Arc::new(SubscriberInner {
                base: BaseSubscriber::new(sink),
                channel_subs: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe(&self, channel: &str) -> Subscription {
        self.inner.base.subscribe(channel);
        self.register(channel)
    }

    pub fn psubscribe(&self, pattern: &str) -> Subscription {
        self.inner.base.psubscribe(pattern);
        self.register(pattern)
    }

    fn register(&self, channel_or_pattern: &str) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriptionQueue {
            messages: Mutex::new(VecDeque::new()),
        });

        self.inner
            .channel_subs
            .lock()
            .unwrap()
            .entry(channel_or_pattern.to_string())
            .or_default()
            .push((id, queue.clone()));

        Subscription {
            id,
            queue,
            channel_or_pattern: channel_or_pattern.to_string(),
            subscriber: Arc::downgrade(&self.inner),
        }
    }

    /// Replay subscriptions after a reconnect.
    pub fn resubscribe_all(&self) {
        self.inner.base.resubscribe_all();
    }

    /// Fan a received message out to every subscription registered for its
    /// channel (or pattern, for pattern messages).
    pub fn dispatch(&self, msg: Message) {
        let key = if msg.has_pattern() {
            msg.pattern.clone()
        } else {
            msg.channel.clone()
        };

        let map = self.inner.channel_subs.lock().unwrap();
        if let Some(subs) = map.get(&key) {
            for (_, queue) in subs {
                let mut q = queue.messages.lock().unwrap();
                if q.len() >= QUEUE_CAPACITY {
                    q.pop_front();
                }
                q.push_back(msg.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::message::MessageType;

    struct NoopSink;
    impl SubscriptionSink for NoopSink {
        fn subscribe(&self, _channel: &str) {}
        fn psubscribe(&self, _pattern: &str) {}
        fn unsubscribe(&self, _channel: &str) {}
        fn punsubscribe(&self, _pattern: &str) {}
    }

    #[test]
    fn dispatch_delivers_to_matching_subscription() {
        let subscriber = Subscriber::new(Box::new(NoopSink));
        let sub = subscriber.subscribe("chan");
        assert!(sub.is_empty());

        subscriber.dispatch(Message::new_message("chan", b"hi".to_vec()));
        assert!(!sub.is_empty());
        let msg = sub.pop_front().unwrap();
        assert_eq!(msg.message_type, MessageType::Message);
        assert_eq!(msg.payload, b"hi");
    }

    #[test]
    fn dropping_subscription_unregisters_it() {
        let subscriber = Subscriber::new(Box::new(NoopSink));
        {
            let _sub = subscriber.subscribe("chan");
            assert_eq!(subscriber.inner.channel_subs.lock().unwrap().len(), 1);
        }
        assert_eq!(subscriber.inner.channel_subs.lock().unwrap().len(), 0);
    }

    #[test]
    fn queue_caps_at_capacity_dropping_oldest() {
        let subscriber = Subscriber::new(Box::new(NoopSink));
        let sub = subscriber.subscribe("chan");
        for i in 0..(QUEUE_CAPACITY + 5) {
            subscriber.dispatch(Message::new_message("chan", vec![i as u8]));
        }
        assert_eq!(sub.queue.messages.lock().unwrap().len(), QUEUE_CAPACITY);
    }
}
