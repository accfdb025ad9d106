//! C3 — `NetworkStream`: byte-level send/recv/shutdown over a connected
//! socket, with an optional TLS filter.
//!
//! Ported from `original_source/src/NetworkStream.hh`. The original keeps an
//! `atomic<bool> isOk` flipped by any failed operation and checked by every
//! caller before further use; we do the same.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::tls::{TlsConfig, TlsFilter};

/// Outcome of a single `recv()` call.
#[derive(Debug, PartialEq, Eq)]
pub enum RecvStatus {
    /// `n` bytes read into the buffer.
    Ok(usize),
    /// The read timed out with no bytes available.
    Timeout,
    /// Peer closed the connection (EOF).
    Disconnected,
}

/// Outcome of a single `send()` call.
#[derive(Debug, PartialEq, Eq)]
pub enum LinkStatus {
    Ok(usize),
    Disconnected,
}

pub struct NetworkStream {
    filter: TlsFilter,
    ok: AtomicBool,
    last_error: std::sync::Mutex<Option<String>>,
}

impl NetworkStream {
    pub fn new(stream: TcpStream, tls: &TlsConfig, domain: &str) -> io::Result<Self> {
        stream.set_nodelay(true)?;

        let filter = if tls.active {
            TlsFilter::connect(tls, domain, stream)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
        } else {
            TlsFilter::plain(stream)
        };

        Ok(NetworkStream {
            filter,
            ok: AtomicBool::new(true),
            last_error: std::sync::Mutex::new(None),
        })
    }

    pub fn ok(&self) -> bool {
        self.ok.load(Ordering::Acquire)
    }

    pub fn get_error(&self) -> Option<String> {
        self.last_error.lock().unwrap().clone()
    }

    fn mark_failed(&self, err: &io::Error) {
        self.ok.store(false, Ordering::Release);
        *self.last_error.lock().unwrap() = Some(err.to_string());
    }

    /// Read up to `buf.len()` bytes, waiting at most `timeout` for the first
    /// byte to arrive. Matches `NetworkStream::recv(buff, len, timeout)`.
    pub fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<RecvStatus> {
        if let TlsFilter::Plain(stream) = &self.filter {
            stream.set_read_timeout(Some(timeout))?;
        }

        match self.filter.read(buf) {
            Ok(0) => {
                self.ok.store(false, Ordering::Release);
                Ok(RecvStatus::Disconnected)
            }
            Ok(n) => Ok(RecvStatus::Ok(n)),
            Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(RecvStatus::Timeout)
            }
            Err(err) => {
                self.mark_failed(&err);
                Err(err)
            }
        }
    }

    /// Write the entire buffer. Matches `NetworkStream::send(buff, len)`.
    pub fn send(&mut self, buf: &[u8]) -> io::Result<LinkStatus> {
        match self.filter.write_all(buf) {
            Ok(()) => Ok(LinkStatus::Ok(buf.len())),
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                self.ok.store(false, Ordering::Release);
                Ok(LinkStatus::Disconnected)
            }
            Err(err) => {
                self.mark_failed(&err);
                Err(err)
            }
        }
    }

    pub fn shutdown(&mut self) -> io::Result<()> {
        self.ok.store(false, Ordering::Release);
        self.filter.shutdown()
    }
}
