//! `SharedHashSubscriber`/`SharedHashSubscription` — fan out field-level
//! updates of a `PersistentSharedHash` to interested listeners, the same
//! RAII-unregister-on-drop shape as [`crate::pubsub::subscriber`].
//!
//! Ported from `original_source/include/qclient/shared/SharedHashSubscription.hh`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

const QUEUE_CAPACITY: usize = 50;

/// A single field change delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedHashUpdate {
    pub key: String,
    pub value: String,
}

type SubscriptionId = u64;

struct Registration {
    id: SubscriptionId,
    queue: Arc<Mutex<VecDeque<SharedHashUpdate>>>,
}

/// Forwards incoming hash updates to every registered [`SharedHashSubscription`].
pub struct SharedHashSubscriber {
    registrations: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
}

impl SharedHashSubscriber {
    pub fn new() -> Arc<Self> {
        Arc::new(SharedHashSubscriber {
            registrations: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        })
    }

    /// Register a new subscription, returning the handle the caller polls.
    pub fn subscribe(self: &Arc<Self>) -> SharedHashSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        self.registrations.lock().unwrap().push(Registration {
            id,
            queue: queue.clone(),
        });
        SharedHashSubscription {
            id,
            queue,
            subscriber: self.clone(),
        }
    }

    pub fn feed_update(&self, update: SharedHashUpdate) {
        for reg in self.registrations.lock().unwrap().iter() {
            let mut q = reg.queue.lock().unwrap();
            if q.len() >= QUEUE_CAPACITY {
                q.pop_front();
            }
            q.push_back(update.clone());
        }
    }

    fn unregister(&self, id: SubscriptionId) {
        self.registrations.lock().unwrap().retain(|r| r.id != id);
    }
}

/// Handle to a live registration on a [`SharedHashSubscriber`]. Dropping it
/// unregisters automatically.
pub struct SharedHashSubscription {
    id: SubscriptionId,
    queue: Arc<Mutex<VecDeque<SharedHashUpdate>>>,
    subscriber: Arc<SharedHashSubscriber>,
}

impl SharedHashSubscription {
    pub fn pop_front(&self) -> Option<SharedHashUpdate> {
        self.queue.lock().unwrap().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }
}

impl Drop for SharedHashSubscription {
    fn drop(&mut self) {
        self.subscriber.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_update_reaches_all_live_subscriptions() {
        let subscriber = SharedHashSubscriber::new();
        let sub_a = subscriber.subscribe();
        let sub_b = subscriber.subscribe();

        subscriber.feed_update(SharedHashUpdate {
            key: "field".into(),
            value: "value".into(),
        });

        assert_eq!(sub_a.pop_front().unwrap().value, "value");
        assert_eq!(sub_b.pop_front().unwrap().value, "value");
    }

    #[test]
    fn dropped_subscription_stops_receiving() {
        let subscriber = SharedHashSubscriber::new();
        {
            let _sub = subscriber.subscribe();
            assert_eq!(subscriber.registrations.lock().unwrap().len(), 1);
        }
        assert_eq!(subscriber.registrations.lock().unwrap().len(), 0);
    }

    #[test]
    fn queue_caps_at_capacity() {
        let subscriber = SharedHashSubscriber::new();
        let sub = subscriber.subscribe();
        for i in 0..(QUEUE_CAPACITY + 5) {
            subscriber.feed_update(SharedHashUpdate {
                key: "k".into(),
                value: i.to_string(),
            });
        }
        assert_eq!(sub.queue.lock().unwrap().len(), QUEUE_CAPACITY);
    }
}
