//! Error taxonomy for the client.
//!
//! A single `RedisError`/`ErrorKind` pair, widened with the connection
//! engine and durability error kinds this crate needs beyond a plain
//! reply error (handshake failure, persistence corruption, vault expiry).

use std::fmt;
use std::io;

/// Broad classification of what went wrong, independent of the human
/// readable message. Kept small and easy for callers to match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connect refused, socket error, EOF, read timeout.
    IoError,
    /// Invalid reply during the handshake sequence.
    AuthenticationFailed,
    /// Malformed RESP, or more replies than requests.
    ResponseError,
    /// A non-MOVED RESP error reply, passed through to the caller.
    ServerError,
    /// `MOVED <slot> <host>:<port>` could not be parsed.
    RedirectParseError,
    /// Backpressure queue is full in a non-blocking push.
    BusyLoadingError,
    /// Any index mismatch or deserialization error in a `PersistencyLayer`.
    PersistencyCorruption,
    /// The future/promise behind a request was dropped without being
    /// satisfied (peer expired, vault deadline, shutdown).
    RequestExpired,
    /// Client has been shut down; no further operations are possible.
    ClientShutdown,
    /// Misc parse/type coercion error (kept for the out-of-scope
    /// command-wrapper layer above us).
    TypeError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::IoError => "I/O error",
            ErrorKind::AuthenticationFailed => "authentication failed",
            ErrorKind::ResponseError => "response error",
            ErrorKind::ServerError => "server error",
            ErrorKind::RedirectParseError => "redirect parse error",
            ErrorKind::BusyLoadingError => "busy loading",
            ErrorKind::PersistencyCorruption => "persistency corruption",
            ErrorKind::RequestExpired => "request expired",
            ErrorKind::ClientShutdown => "client shut down",
            ErrorKind::TypeError => "type error",
        };
        f.write_str(s)
    }
}

/// The single error type returned by every fallible operation in this crate.
#[derive(Debug, thiserror::Error)]
pub enum RedisError {
    #[error("{kind}: {detail}")]
    Simple { kind: ErrorKind, detail: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("persistence store error: {0}")]
    Store(#[from] sled::Error),
}

impl RedisError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        RedisError::Simple {
            kind,
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RedisError::Simple { kind, .. } => *kind,
            RedisError::Io(_) => ErrorKind::IoError,
            RedisError::Tls(_) => ErrorKind::IoError,
            RedisError::Store(_) => ErrorKind::PersistencyCorruption,
        }
    }
}

impl From<(ErrorKind, &str)> for RedisError {
    fn from((kind, detail): (ErrorKind, &str)) -> Self {
        RedisError::new(kind, detail)
    }
}

pub type RedisResult<T> = Result<T, RedisError>;
