//! The reader thread: pulls bytes off the socket, turns them into RESP
//! frames, and either dispatches a push-type frame to pub/sub or feeds an
//! ordinary reply to `ConnectionCore::consume_response`.
//!
//! Ported from the reply-dispatch half of `original_source/src/WriterThread.cc`
//! and the read loop described in `original_source/include/qclient/QClient.hh`
//! (the original drives both from one `eventLoopThread`; we split reading
//! from writing into their own threads, matching how `NetworkStream` exposes
//! independent blocking `recv`/`send`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::core::ConnectionCore;
use crate::parser::RespParser;
use crate::stream::{NetworkStream, RecvStatus};
use crate::types::Reply;

const READ_TIMEOUT: Duration = Duration::from_millis(200);
const READ_CHUNK: usize = 16 * 1024;

/// Called for every frame read off the wire that isn't an ordinary
/// request/reply (a RESP3 push frame, used here for pub/sub messages and
/// subscribe/unsubscribe acks).
pub type PushHandler = Arc<dyn Fn(Reply) + Send + Sync>;

pub struct Reader {
    broken: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Reader {
    pub fn spawn(
        core: Arc<ConnectionCore>,
        stream: Arc<Mutex<NetworkStream>>,
        shutdown: Arc<AtomicBool>,
        on_push: PushHandler,
    ) -> Self {
        let broken = Arc::new(AtomicBool::new(false));
        let loop_broken = broken.clone();

        let handle = thread::Builder::new()
            .name("qclient-reader".into())
            .spawn(move || Self::run(core, stream, shutdown, on_push, loop_broken))
            .expect("spawn qclient-reader thread");

        Reader {
            broken,
            handle: Some(handle),
        }
    }

    fn run(
        core: Arc<ConnectionCore>,
        stream: Arc<Mutex<NetworkStream>>,
        shutdown: Arc<AtomicBool>,
        on_push: PushHandler,
        broken: Arc<AtomicBool>,
    ) {
        let mut parser = RespParser::new();
        let mut buf = vec![0u8; READ_CHUNK];

        loop {
            if shutdown.load(Ordering::Acquire) {
                return;
            }

            let outcome = {
                let mut guard = stream.lock().unwrap();
                guard.recv(&mut buf, READ_TIMEOUT)
            };

            match outcome {
                Ok(RecvStatus::Ok(n)) => {
                    parser.feed(&buf[..n]);
                    if !Self::drain_frames(&core, &mut parser, &on_push) {
                        broken.store(true, Ordering::Release);
                        core.set_blocking_mode(false);
                        return;
                    }
                }
                Ok(RecvStatus::Timeout) => continue,
                Ok(RecvStatus::Disconnected) | Err(_) => {
                    broken.store(true, Ordering::Release);
                    core.set_blocking_mode(false);
                    return;
                }
            }
        }
    }

    /// Returns `false` if a frame was malformed or the core rejected an
    /// unsolicited reply, either of which means the connection is broken.
    fn drain_frames(core: &Arc<ConnectionCore>, parser: &mut RespParser, on_push: &PushHandler) -> bool {
        loop {
            match parser.poll() {
                Ok(Some(value)) => {
                    let reply: Reply = Arc::new(value);
                    if reply.is_push() {
                        on_push(reply);
                        continue;
                    }
                    if !core.consume_response(&reply) {
                        return false;
                    }
                }
                Ok(None) => return true,
                Err(_) => return false,
            }
        }
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.stop();
    }
}
