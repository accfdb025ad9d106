//! `AckTracker` — tracks which items in the durable flusher's queue have
//! been acknowledged by the server, so we know the low-water mark that's
//! safe to trim from the persistency layer.
//!
//! Ported from `original_source/include/qclient/utils/AckTracker.hh`. Two
//! implementations, matching two flusher modes: `HighestAckTracker`
//! for in-order (serial) acknowledgement where only the highest index
//! matters, and `LowestAckTracker` for out-of-order (lock-free) flushing
//! where gaps must be tracked explicitly until they fill in.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use crate::request::ItemIndex;

pub trait AckTracker: Send + Sync {
    fn ack_index(&self, index: ItemIndex);
    fn is_acked(&self, index: ItemIndex) -> bool;
    fn set_starting_index(&self, index: ItemIndex);
    fn get_starting_index(&self) -> ItemIndex;
    fn get_highest_acked_index(&self) -> ItemIndex;
}

/// Only the highest contiguous acknowledgement matters: used when the
/// flusher submits strictly in order, so "acked up to N" always implies
/// every index below N is also acked.
#[derive(Default)]
pub struct HighestAckTracker {
    next_index: AtomicI64,
}

impl HighestAckTracker {
    pub fn new() -> Self {
        HighestAckTracker::default()
    }
}

impl AckTracker for HighestAckTracker {
    fn ack_index(&self, index: ItemIndex) {
        let curr_high = self.next_index.load(Ordering::Acquire);
        self.next_index
            .store((index + 1).max(curr_high), Ordering::Release);
    }

    fn is_acked(&self, index: ItemIndex) -> bool {
        index < self.next_index.load(Ordering::Acquire)
    }

    fn set_starting_index(&self, index: ItemIndex) {
        self.next_index.store(index, Ordering::Release);
    }

    fn get_starting_index(&self) -> ItemIndex {
        self.next_index.load(Ordering::Acquire)
    }

    fn get_highest_acked_index(&self) -> ItemIndex {
        self.next_index.load(Ordering::Acquire)
    }
}

/// Tracks individual acknowledged indices explicitly, since out-of-order
/// flushing can ack index 5 before index 3. The starting index only
/// advances once the gap at its position closes.
pub struct LowestAckTracker {
    state: Mutex<LowestState>,
}

struct LowestState {
    acked: BTreeSet<ItemIndex>,
    starting_index: ItemIndex,
}

impl Default for LowestAckTracker {
    fn default() -> Self {
        LowestAckTracker {
            state: Mutex::new(LowestState {
                acked: BTreeSet::new(),
                starting_index: 0,
            }),
        }
    }
}

impl LowestAckTracker {
    pub fn new() -> Self {
        LowestAckTracker::default()
    }
}

impl AckTracker for LowestAckTracker {
    fn ack_index(&self, index: ItemIndex) {
        let mut state = self.state.lock().unwrap();
        state.acked.insert(index);
        while let Some(&first) = state.acked.iter().next() {
            if first != state.starting_index {
                break;
            }
            state.acked.remove(&first);
            state.starting_index += 1;
        }
    }

    fn is_acked(&self, index: ItemIndex) -> bool {
        let state = self.state.lock().unwrap();
        if index < state.starting_index {
            return true;
        }
        state.acked.contains(&index)
    }

    fn set_starting_index(&self, index: ItemIndex) {
        self.state.lock().unwrap().starting_index = index;
    }

    fn get_starting_index(&self) -> ItemIndex {
        self.state.lock().unwrap().starting_index
    }

    fn get_highest_acked_index(&self) -> ItemIndex {
        let state = self.state.lock().unwrap();
        state.acked.iter().next_back().copied().unwrap_or(0)
    }
}

/// Tracker kind selector, mirroring the original's `makeAckTracker(string_view)`
/// factory string but as a proper enum rather than stringly-typed input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckTrackerKind {
    Highest,
    Lowest,
}

pub fn make_ack_tracker(kind: AckTrackerKind) -> Box<dyn AckTracker> {
    match kind {
        AckTrackerKind::Highest => Box::new(HighestAckTracker::new()),
        AckTrackerKind::Lowest => Box::new(LowestAckTracker::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_tracker_acks_everything_below_high_watermark() {
        let tracker = HighestAckTracker::new();
        tracker.ack_index(5);
        assert!(tracker.is_acked(0));
        assert!(tracker.is_acked(5));
        assert!(!tracker.is_acked(6));
        assert_eq!(tracker.get_highest_acked_index(), 6);
    }

    #[test]
    fn highest_tracker_ignores_out_of_order_regression() {
        let tracker = HighestAckTracker::new();
        tracker.ack_index(10);
        tracker.ack_index(3);
        assert_eq!(tracker.get_highest_acked_index(), 11);
    }

    #[test]
    fn lowest_tracker_advances_starting_index_only_once_gap_fills() {
        let tracker = LowestAckTracker::new();
        tracker.ack_index(2);
        assert_eq!(tracker.get_starting_index(), 0);
        assert!(!tracker.is_acked(0));
        assert!(tracker.is_acked(2));

        tracker.ack_index(0);
        assert_eq!(tracker.get_starting_index(), 1);
        tracker.ack_index(1);
        // 0, 1, 2 all acked contiguously now -> starting index jumps past all three.
        assert_eq!(tracker.get_starting_index(), 3);
    }

    #[test]
    fn make_ack_tracker_selects_by_kind() {
        let high = make_ack_tracker(AckTrackerKind::Highest);
        high.ack_index(4);
        assert!(high.is_acked(0));

        let low = make_ack_tracker(AckTrackerKind::Lowest);
        low.ack_index(4);
        assert!(!low.is_acked(0));
    }
}
