//! The writer thread: pulls the next frame `ConnectionCore` wants sent and
//! pushes it onto the socket.
//!
//! Ported from `original_source/src/WriterThread.{hh,cc}`. The original
//! drives its own event loop waiting on an eventfd for POLLOUT readiness;
//! we don't need that here because `NetworkStream::send` performs a
//! blocking `write_all`, which already waits on the OS write buffer
//! draining. Shutdown is cooperative: `ConnectionCore::set_blocking_mode`
//! wakes `get_next_to_write` with `None`, which ends the loop, rather than
//! the original's dedicated shutdown eventfd.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::core::ConnectionCore;
use crate::stream::{LinkStatus, NetworkStream};

/// Spawns and owns the writer thread for one connection attempt. Dropping
/// this (or calling `stop`) tells the core to stop blocking for more work
/// and joins the thread.
pub struct Writer {
    core: Arc<ConnectionCore>,
    broken: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Writer {
    pub fn spawn(core: Arc<ConnectionCore>, stream: Arc<Mutex<NetworkStream>>) -> Self {
        let broken = Arc::new(AtomicBool::new(false));

        let loop_core = core.clone();
        let loop_broken = broken.clone();
        let handle = thread::Builder::new()
            .name("qclient-writer".into())
            .spawn(move || Self::run(loop_core, stream, loop_broken))
            .expect("spawn qclient-writer thread");

        Writer {
            core,
            broken,
            handle: Some(handle),
        }
    }

    fn run(core: Arc<ConnectionCore>, stream: Arc<Mutex<NetworkStream>>, broken: Arc<AtomicBool>) {
        while let Some(frame) = core.get_next_to_write() {
            let outcome = {
                let mut guard = stream.lock().unwrap();
                guard.send(&frame.bytes)
            };

            match outcome {
                Ok(LinkStatus::Ok(_)) => continue,
                Ok(LinkStatus::Disconnected) | Err(_) => {
                    broken.store(true, Ordering::Release);
                    core.set_blocking_mode(false);
                    return;
                }
            }
        }
    }

    /// True once a send has failed and the connection needs to be torn
    /// down and retried.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    pub fn stop(&mut self) {
        self.core.set_blocking_mode(false);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backpressure::{Backpressure, BackpressureStrategy};
    use crate::handshake::PingHandshake;
    use crate::request::EncodedRequest;
    use crate::tls::TlsConfig;
    use std::io::Read;
    use std::net::TcpListener;

    fn loopback_pair() -> (std::net::TcpStream, std::net::TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn writer_sends_staged_handshake_and_requests_over_the_socket() {
        let (client_side, mut server_side) = loopback_pair();
        let stream =
            Arc::new(Mutex::new(NetworkStream::new(client_side, &TlsConfig::disabled(), "localhost").unwrap()));

        let core = Arc::new(ConnectionCore::new(
            Box::new(PingHandshake::default()),
            Arc::new(Backpressure::new(BackpressureStrategy::Infinite)),
        ));
        let _future = core.stage(EncodedRequest::from_args(["GET", "a"]), 0);

        let mut writer = Writer::spawn(core, stream);

        let mut buf = [0u8; 256];
        server_side
            .set_read_timeout(Some(std::time::Duration::from_secs(2)))
            .unwrap();
        let n = server_side.read(&mut buf).unwrap();
        assert!(buf[..n].starts_with(b"*2\r\n$4\r\nPING"));

        writer.stop();
    }
}
