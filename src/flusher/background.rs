//! `BackgroundFlusher` — drains the durable queue onto the connection.
//!
//! Ported from `original_source/include/qclient/BackgroundFlusher.hh`. The
//! original's `AssistedThread` main loop becomes a plain `std::thread` with
//! an explicit shutdown flag; `checkPendingQueue`/`processPipeline` become
//! `drain_ready_replies`/`fill_pipeline` below.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::ack_tracker::AckTracker;
use crate::backpressure::{Backpressure, BackpressureStrategy};
use crate::future::QFuture;
use crate::persistency::{PersistencyLayer, QueueItem};
use crate::request::{EncodedRequest, ItemIndex};
use crate::types::{Reply, Value};

use super::{FlusherQueueHandler, Notifier};

/// The seam `BackgroundFlusher` submits encoded commands through. The
/// `Client` implements this; kept as a trait here so the flusher has
/// no direct dependency on the connection engine's internals.
pub trait CommandSink: Send + Sync {
    fn submit(&self, request: EncodedRequest) -> QFuture<Reply>;
}

struct PendingItem {
    index: ItemIndex,
    future: QFuture<Reply>,
}

pub struct BackgroundFlusher {
    persistency: Arc<dyn PersistencyLayer>,
    ack_tracker: Option<Arc<dyn AckTracker>>,
    handler: FlusherQueueHandler,
    backpressure: Arc<Backpressure>,
    enqueued: AtomicI64,
    new_item: Condvar,
    new_item_lock: Mutex<()>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl BackgroundFlusher {
    pub fn new(
        sink: Arc<dyn CommandSink>,
        notifier: Arc<dyn Notifier>,
        persistency: Arc<dyn PersistencyLayer>,
        ack_tracker: Option<Arc<dyn AckTracker>>,
        handler: FlusherQueueHandler,
        pipeline_length: usize,
        backpressure_strategy: BackpressureStrategy,
    ) -> Self {
        let backpressure = Arc::new(Backpressure::new(backpressure_strategy));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = {
            let persistency = persistency.clone();
            let ack_tracker = ack_tracker.clone();
            let backpressure = backpressure.clone();
            let shutdown = shutdown.clone();

            thread::Builder::new()
                .name("background-flusher".into())
                .spawn(move || {
                    Self::main_loop(
                        sink,
                        notifier,
                        persistency,
                        ack_tracker,
                        handler,
                        pipeline_length,
                        backpressure,
                        shutdown,
                    )
                })
                .expect("spawn background-flusher thread")
        };

        BackgroundFlusher {
            persistency,
            ack_tracker,
            handler,
            backpressure,
            enqueued: AtomicI64::new(0),
            new_item: Condvar::new(),
            new_item_lock: Mutex::new(()),
            shutdown,
            worker: Some(worker),
        }
    }

    /// Durably append a command to the flusher's queue, blocking first if
    /// backpressure says there's no room.
    pub fn push_request(&self, operation: QueueItem) {
        self.backpressure.acquire();
        self.persistency.record(&operation);
        self.enqueued.fetch_add(1, Ordering::Relaxed);

        let _guard = self.new_item_lock.lock().unwrap();
        self.new_item.notify_one();
    }

    pub fn get_enqueued_and_clear(&self) -> i64 {
        self.enqueued.swap(0, Ordering::Relaxed)
    }

    pub fn size(&self) -> usize {
        (self.persistency.ending_index() - self.persistency.starting_index()).max(0) as usize
    }

    #[allow(clippy::too_many_arguments)]
    fn main_loop(
        sink: Arc<dyn CommandSink>,
        notifier: Arc<dyn Notifier>,
        persistency: Arc<dyn PersistencyLayer>,
        ack_tracker: Option<Arc<dyn AckTracker>>,
        handler: FlusherQueueHandler,
        pipeline_length: usize,
        backpressure: Arc<Backpressure>,
        shutdown: Arc<AtomicBool>,
    ) {
        let mut in_flight: VecDeque<PendingItem> = VecDeque::new();
        let mut next_to_send = persistency.starting_index();

        while !shutdown.load(Ordering::Acquire) {
            Self::fill_pipeline(
                &sink,
                &persistency,
                &mut next_to_send,
                &mut in_flight,
                pipeline_length,
            );

            if in_flight.is_empty() {
                thread::sleep(Duration::from_millis(10));
                continue;
            }

            Self::drain_ready_replies(
                &persistency,
                &ack_tracker,
                handler,
                &notifier,
                &backpressure,
                &mut in_flight,
            );
        }

        notifier.event_shutdown();
    }

    fn fill_pipeline(
        sink: &Arc<dyn CommandSink>,
        persistency: &Arc<dyn PersistencyLayer>,
        next_to_send: &mut ItemIndex,
        in_flight: &mut VecDeque<PendingItem>,
        pipeline_length: usize,
    ) {
        let ending = persistency.ending_index();
        while in_flight.len() < pipeline_length && *next_to_send < ending {
            let index = *next_to_send;
            if let Some(args) = persistency.retrieve(index) {
                let encoded = EncodedRequest::from_args(args);
                let future = sink.submit(encoded);
                in_flight.push_back(PendingItem { index, future });
            }
            *next_to_send += 1;
        }
    }

    fn drain_ready_replies(
        persistency: &Arc<dyn PersistencyLayer>,
        ack_tracker: &Option<Arc<dyn AckTracker>>,
        handler: FlusherQueueHandler,
        notifier: &Arc<dyn Notifier>,
        backpressure: &Arc<Backpressure>,
        in_flight: &mut VecDeque<PendingItem>,
    ) {
        // Serial mode only ever waits on the oldest in-flight item, since
        // replies must arrive in submission order. Lock-free mode polls
        // every in-flight item so a later reply doesn't block on an
        // earlier one that's slow to arrive.
        match handler {
            FlusherQueueHandler::Serial => {
                if let Some(front) = in_flight.front() {
                    if let Some(reply) = front.future.wait_timeout(Duration::from_millis(50)) {
                        let item = in_flight.pop_front().unwrap();
                        Self::settle(persistency, ack_tracker, notifier, backpressure, item.index, &reply);
                    }
                }
            }
            FlusherQueueHandler::LockFree => {
                let mut settled = Vec::new();
                for (i, item) in in_flight.iter().enumerate() {
                    if let Some(reply) = item.future.wait_timeout(Duration::from_millis(0)) {
                        settled.push((i, item.index, reply));
                    }
                }
                for (i, index, reply) in settled.into_iter().rev() {
                    in_flight.remove(i);
                    Self::settle(persistency, ack_tracker, notifier, backpressure, index, &reply);
                }
            }
        }
    }

    fn settle(
        persistency: &Arc<dyn PersistencyLayer>,
        ack_tracker: &Option<Arc<dyn AckTracker>>,
        notifier: &Arc<dyn Notifier>,
        backpressure: &Arc<Backpressure>,
        index: ItemIndex,
        reply: &Reply,
    ) {
        if reply.is_error() {
            if let Value::Error(msg) = reply.as_ref() {
                notifier.event_unexpected_response(msg);
            }
        }

        if let Some(tracker) = ack_tracker {
            tracker.ack_index(index);
            persistency.pop_index(index);
        } else {
            persistency.pop();
        }

        backpressure.release();
    }

    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BackgroundFlusher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flusher::NullNotifier;
    use crate::persistency::memory::MemoryPersistency;
    use crate::future::pair;

    struct EchoSink;

    impl CommandSink for EchoSink {
        fn submit(&self, _request: EncodedRequest) -> QFuture<Reply> {
            let (promise, future) = pair();
            promise.set_value(Arc::new(Value::Status("OK".into())));
            future
        }
    }

    #[test]
    fn pushed_requests_eventually_drain() {
        let persistency: Arc<dyn PersistencyLayer> = Arc::new(MemoryPersistency::new());
        let mut flusher = BackgroundFlusher::new(
            Arc::new(EchoSink),
            Arc::new(NullNotifier),
            persistency.clone(),
            None,
            FlusherQueueHandler::Serial,
            4,
            BackpressureStrategy::Infinite,
        );

        flusher.push_request(vec![b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()]);
        flusher.push_request(vec![b"SET".to_vec(), b"k2".to_vec(), b"v2".to_vec()]);

        let mut waited = Duration::ZERO;
        while persistency.starting_index() < 2 && waited < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(10));
            waited += Duration::from_millis(10);
        }

        assert_eq!(persistency.starting_index(), 2);
        flusher.shutdown();
    }
}
