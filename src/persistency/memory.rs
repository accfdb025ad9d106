//! In-memory `PersistencyLayer` — for tests, and for callers who accept
//! losing in-flight writes on a crash in exchange for zero I/O overhead.
//!
//! Ported from `original_source/include/qclient/MemoryPersistency.hh`'s
//! `StubInMemoryPersistency`. The original's header comment is explicit that
//! this is a testing stub, not meant for production use; we keep that
//! caveat.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::ack_tracker::{AckTracker, LowestAckTracker};
use crate::request::ItemIndex;

use super::{PersistencyLayer, QueueItem};

/// Not durable across restarts — entirely in-memory. Intended for tests and
/// for measuring flusher throughput without storage overhead.
pub struct MemoryPersistency {
    data: Mutex<BTreeMap<ItemIndex, QueueItem>>,
    ending_index: Mutex<ItemIndex>,
    ack_tracker: Box<dyn AckTracker>,
}

impl MemoryPersistency {
    pub fn new() -> Self {
        MemoryPersistency {
            data: Mutex::new(BTreeMap::new()),
            ending_index: Mutex::new(0),
            ack_tracker: Box::new(LowestAckTracker::new()),
        }
    }

    pub fn with_ack_tracker(ack_tracker: Box<dyn AckTracker>) -> Self {
        MemoryPersistency {
            data: Mutex::new(BTreeMap::new()),
            ending_index: Mutex::new(0),
            ack_tracker,
        }
    }
}

impl Default for MemoryPersistency {
    fn default() -> Self {
        MemoryPersistency::new()
    }
}

impl PersistencyLayer for MemoryPersistency {
    fn record_at(&self, index: ItemIndex, item: &QueueItem) {
        let mut data = self.data.lock().unwrap();
        data.insert(index, item.clone());
        let mut ending = self.ending_index.lock().unwrap();
        *ending = (*ending).max(index + 1);
    }

    fn record(&self, item: &QueueItem) -> ItemIndex {
        let mut ending = self.ending_index.lock().unwrap();
        let index = *ending;
        self.data.lock().unwrap().insert(index, item.clone());
        *ending = index + 1;
        index
    }

    fn pop(&self) {
        let mut data = self.data.lock().unwrap();
        if let Some((&first, _)) = data.iter().next() {
            data.remove(&first);
        }
        let starting = self.ack_tracker.get_starting_index();
        self.ack_tracker.ack_index(starting);
    }

    fn pop_index(&self, index: ItemIndex) {
        self.data.lock().unwrap().remove(&index);
        self.ack_tracker.ack_index(index);
    }

    fn starting_index(&self) -> ItemIndex {
        self.ack_tracker.get_starting_index()
    }

    fn ending_index(&self) -> ItemIndex {
        *self.ending_index.lock().unwrap()
    }

    fn retrieve(&self, index: ItemIndex) -> Option<QueueItem> {
        self.data.lock().unwrap().get(&index).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_retrieves_items_in_order() {
        let layer = MemoryPersistency::new();
        let idx0 = layer.record(&vec![b"SET".to_vec()]);
        let idx1 = layer.record(&vec![b"GET".to_vec()]);
        assert_eq!(idx0, 0);
        assert_eq!(idx1, 1);
        assert_eq!(layer.ending_index(), 2);
        assert_eq!(layer.retrieve(0), Some(vec![b"SET".to_vec()]));
    }

    #[test]
    fn pop_index_advances_starting_index_via_ack_tracker() {
        let layer = MemoryPersistency::new();
        layer.record(&vec![b"A".to_vec()]);
        layer.record(&vec![b"B".to_vec()]);
        assert_eq!(layer.starting_index(), 0);
        layer.pop_index(0);
        assert_eq!(layer.starting_index(), 1);
    }
}
