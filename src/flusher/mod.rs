//! The durable background flusher: a queue of staged commands, backed by a
//! `PersistencyLayer`, drained by a dedicated thread that pipelines requests
//! onto the underlying connection and only trims the durable log once a
//! reply confirms the server actually applied them.
//!
//! Ported from `original_source/include/qclient/BackgroundFlusher.hh` and
//! `PersistencyLayerBuilder.hh`.

pub mod background;

use crate::ack_tracker::AckTrackerKind;

/// How the flusher drains its queue. `Serial` submits in order and only
/// ever needs to know the single highest acked index; `LockFree` allows
/// multiple requests in flight whose replies can arrive out of order, so it
/// needs a real `AckTracker` to track the gaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlusherQueueHandler {
    Serial,
    LockFree,
}

/// Which concrete `PersistencyLayer` backs the flusher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistencyLayerKind {
    Memory,
    Disk,
}

/// Resolved flusher configuration, the Rust analogue of
/// `PersistencyConfigfromString` + `PersistencyLayerBuilder`.
#[derive(Debug, Clone, Copy)]
pub struct FlusherConfig {
    pub persistency: PersistencyLayerKind,
    pub handler: FlusherQueueHandler,
    pub ack_tracker: Option<AckTrackerKind>,
}

impl FlusherConfig {
    /// Parses the original's colon-separated configuration strings
    /// (`"MEMORY"`, `"MEMORY_MULTI"`, `"ROCKSDB"`, `"ROCKSDB_MULTI"`, each
    /// optionally followed by `:HIGH` or `:LOW`) into a `FlusherConfig`.
    /// Unrecognized persistency names fall back to on-disk serial, matching
    /// the original's default branch.
    pub fn parse(spec: &str) -> Self {
        let mut parts = spec.splitn(2, ':');
        let kind = parts.next().unwrap_or("");
        let tracker = parts.next();

        let (persistency, handler) = match kind {
            "MEMORY_MULTI" => (PersistencyLayerKind::Memory, FlusherQueueHandler::LockFree),
            "MEMORY" => (PersistencyLayerKind::Memory, FlusherQueueHandler::Serial),
            "ROCKSDB_MULTI" | "DISK_MULTI" => (PersistencyLayerKind::Disk, FlusherQueueHandler::LockFree),
            _ => (PersistencyLayerKind::Disk, FlusherQueueHandler::Serial),
        };

        let ack_tracker = tracker.and_then(|t| match t {
            "HIGH" => Some(AckTrackerKind::Highest),
            "LOW" => Some(AckTrackerKind::Lowest),
            _ => None,
        });

        FlusherConfig {
            persistency,
            handler,
            ack_tracker,
        }
    }
}

/// Notified whenever the flusher hits trouble. Implementations must not
/// block for long — they run on the flusher's own thread.
pub trait Notifier: Send + Sync {
    fn event_network_issue(&self, _err: &str) {}
    fn event_unexpected_response(&self, _err: &str) {}
    fn event_shutdown(&self) {}
}

/// A `Notifier` that does nothing, for callers who don't care.
pub struct NullNotifier;

impl Notifier for NullNotifier {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_configurations() {
        let cfg = FlusherConfig::parse("MEMORY_MULTI:HIGH");
        assert_eq!(cfg.persistency, PersistencyLayerKind::Memory);
        assert_eq!(cfg.handler, FlusherQueueHandler::LockFree);
        assert_eq!(cfg.ack_tracker, Some(AckTrackerKind::Highest));
    }

    #[test]
    fn unrecognized_name_falls_back_to_disk_serial() {
        let cfg = FlusherConfig::parse("whatever");
        assert_eq!(cfg.persistency, PersistencyLayerKind::Disk);
        assert_eq!(cfg.handler, FlusherQueueHandler::Serial);
    }
}
