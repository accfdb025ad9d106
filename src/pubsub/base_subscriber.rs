//! `BaseSubscriber` — the thin layer that remembers which channels and
//! patterns we've subscribed to, so they can be replayed after a
//! reconnect. The actual wire subscribe/unsubscribe commands are issued
//! through a `SubscriptionSink`.
//!
//! Ported from `original_source/include/qclient/pubsub/BaseSubscriber.hh`.

use std::collections::HashSet;
use std::sync::Mutex;

/// The seam `BaseSubscriber` issues SUBSCRIBE/PSUBSCRIBE/UNSUBSCRIBE/
/// PUNSUBSCRIBE through.
pub trait SubscriptionSink: Send + Sync {
    fn subscribe(&self, channel: &str);
    fn psubscribe(&self, pattern: &str);
    fn unsubscribe(&self, channel: &str);
    fn punsubscribe(&self, pattern: &str);
}

#[derive(Default)]
struct Subscriptions {
    channels: HashSet<String>,
    patterns: HashSet<String>,
}

pub struct BaseSubscriber {
    sink: Box<dyn SubscriptionSink>,
    subscriptions: Mutex<Subscriptions>,
}

impl BaseSubscriber {
    pub fn new(sink: Box<dyn SubscriptionSink>) -> Self {
        BaseSubscriber {
            sink,
            subscriptions: Mutex::new(Subscriptions::default()),
        }
    }

    pub fn subscribe(&self, channel: &str) {
        let mut subs = self.subscriptions.lock().unwrap();
        if subs.channels.insert(channel.to_string()) {
            self.sink.subscribe(channel);
        }
    }

    pub fn psubscribe(&self, pattern: &str) {
        let mut subs = self.subscriptions.lock().unwrap();
        if subs.patterns.insert(pattern.to_string()) {
            self.sink.psubscribe(pattern);
        }
    }

    pub fn unsubscribe(&self, channel: &str) {
        let mut subs = self.subscriptions.lock().unwrap();
        if subs.channels.remove(channel) {
            self.sink.unsubscribe(channel);
        }
    }

    pub fn punsubscribe(&self, pattern: &str) {
        let mut subs = self.subscriptions.lock().unwrap();
        if subs.patterns.remove(pattern) {
            self.sink.punsubscribe(pattern);
        }
    }

    /// Replay every active subscription onto a freshly (re)established
    /// connection.
    pub fn resubscribe_all(&self) {
        let subs = self.subscriptions.lock().unwrap();
        for channel in &subs.channels {
            self.sink.subscribe(channel);
        }
        for pattern in &subs.patterns {
            self.sink.psubscribe(pattern);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    struct RecordingSink {
        events: StdMutex<Vec<String>>,
    }

    impl SubscriptionSink for Arc<RecordingSink> {
        fn subscribe(&self, channel: &str) {
            self.events.lock().unwrap().push(format!("sub:{channel}"));
        }
        fn psubscribe(&self, pattern: &str) {
            self.events.lock().unwrap().push(format!("psub:{pattern}"));
        }
        fn unsubscribe(&self, channel: &str) {
            self.events.lock().unwrap().push(format!("unsub:{channel}"));
        }
        fn punsubscribe(&self, pattern: &str) {
            self.events.lock().unwrap().push(format!("punsub:{pattern}"));
        }
    }

    #[test]
    fn resubscribe_all_replays_every_active_subscription() {
        let sink = Arc::new(RecordingSink {
            events: StdMutex::new(Vec::new()),
        });
        let base = BaseSubscriber::new(Box::new(sink.clone()));
        base.subscribe("chan-a");
        base.psubscribe("pat-*");
        base.resubscribe_all();

        assert_eq!(
            *sink.events.lock().unwrap(),
            vec!["sub:chan-a", "psub:pat-*", "sub:chan-a", "psub:pat-*"]
        );

        // Duplicate subscribe is a no-op.
        base.subscribe("chan-a");
        assert_eq!(sink.events.lock().unwrap().len(), 4);
    }
}
