//! A synchronous, thread-driven client for a Redis-compatible, RESP-speaking
//! server, with support for `MOVED` redirects, transparent reconnection, a
//! durable background flusher, pub/sub, and versioned shared data
//! structures layered over a single connection.
//!
//! Modeled on CERN's `qclient`: see `original_source/` for the C++ this
//! crate's semantics are ported from. Unlike the original, this crate is
//! built entirely on `std::thread`/`Mutex`/`Condvar` plus `mio` for
//! non-blocking connect — there is no `async`/executor layer anywhere here.

pub mod ack_tracker;
pub mod backpressure;
pub mod callback;
pub mod client;
pub mod connector;
pub mod core;
pub mod endpoint;
pub mod error;
pub mod fault_injector;
pub mod flusher;
pub mod future;
pub mod handshake;
pub mod options;
pub mod parser;
pub mod persistency;
pub mod pubsub;
pub mod queue;
pub mod reader;
pub mod request;
pub mod shared;
pub mod stream;
pub mod tls;
pub mod types;
pub mod writer;

pub use client::Client;
pub use endpoint::{Endpoint, Members};
pub use error::{ErrorKind, RedisError, RedisResult};
pub use options::{Options, RetryStrategy, SubscriptionOptions};
pub use types::{Reply, Value};
