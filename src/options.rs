//! Client configuration: `Options` for the main connection, plus the
//! narrower `SubscriptionOptions` for a `Subscriber`.
//!
//! Ported from `original_source/include/qclient/Options.hh`. The original's
//! fluent `qclient::Options&` setters become consuming `self -> Self`
//! builder methods, the idiomatic Rust shape for the same pattern.

use std::time::Duration;

use crate::backpressure::BackpressureStrategy;
use crate::handshake::{Handshake, HandshakeChainer, HmacAuthHandshake};
use crate::tls::TlsConfig;

/// How a dropped-connection failure is turned into (or not into) a retry.
#[derive(Debug, Clone, Copy)]
pub enum RetryStrategy {
    /// Fail immediately; the caller resubmits if it wants to.
    NoRetries,
    /// Keep retrying for up to this long, counted per-connection rather
    /// than per-request.
    WithTimeout(Duration),
    /// Retry forever.
    InfiniteRetries,
    /// Retry up to `n` times, then give up.
    NRetries(i64),
}

impl RetryStrategy {
    pub fn n_retries(retries: i64) -> Self {
        if retries == 0 {
            RetryStrategy::NoRetries
        } else {
            RetryStrategy::NRetries(retries)
        }
    }

    pub fn active(&self) -> bool {
        !matches!(self, RetryStrategy::NoRetries)
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::NoRetries
    }
}

/// Main-connection configuration.
pub struct Options {
    pub transparent_redirects: bool,
    pub retry_strategy: RetryStrategy,
    pub backpressure_strategy: BackpressureStrategy,
    pub tls_config: TlsConfig,
    pub handshake: Option<Box<dyn Handshake>>,
    pub ensure_connection_is_primed: bool,
    pub tcp_timeout: Duration,
    pub exclusive_pubsub: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            transparent_redirects: false,
            retry_strategy: RetryStrategy::NoRetries,
            backpressure_strategy: BackpressureStrategy::LimitSize(262_144),
            tls_config: TlsConfig::disabled(),
            handshake: None,
            ensure_connection_is_primed: true,
            tcp_timeout: Duration::from_secs(2),
            exclusive_pubsub: true,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Options::default()
    }

    /// Chain another handshake onto whatever is already configured. A
    /// first call sets the top-level handshake directly.
    pub fn chain_handshake(mut self, handshake: Box<dyn Handshake>) -> Self {
        self.handshake = Some(match self.handshake.take() {
            None => handshake,
            Some(existing) => Box::new(HandshakeChainer::new(existing, handshake)),
        });
        self
    }

    pub fn chain_hmac_handshake(self, password: impl Into<String>) -> Self {
        let password = password.into();
        if password.is_empty() {
            return self;
        }
        self.chain_handshake(Box::new(HmacAuthHandshake::new(password)))
    }

    pub fn with_transparent_redirects(mut self) -> Self {
        self.transparent_redirects = true;
        self
    }

    pub fn without_transparent_redirects(mut self) -> Self {
        self.transparent_redirects = false;
        self
    }

    pub fn with_backpressure_strategy(mut self, strategy: BackpressureStrategy) -> Self {
        self.backpressure_strategy = strategy;
        self
    }

    pub fn with_retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = strategy;
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls_config = tls;
        self
    }
}

/// Configuration for a `Subscriber` — narrower than `Options` since a
/// pub/sub-only connection has no backpressure or redirect concerns of its
/// own (those live on the underlying `Client` it shares wire plumbing with).
pub struct SubscriptionOptions {
    pub tls_config: TlsConfig,
    pub handshake: Option<Box<dyn Handshake>>,
    pub use_push_types: bool,
    pub retry_strategy: RetryStrategy,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        SubscriptionOptions {
            tls_config: TlsConfig::disabled(),
            handshake: None,
            use_push_types: false,
            retry_strategy: RetryStrategy::NoRetries,
        }
    }
}

impl SubscriptionOptions {
    pub fn new() -> Self {
        SubscriptionOptions::default()
    }

    pub fn with_push_types(mut self) -> Self {
        self.use_push_types = true;
        self
    }

    pub fn with_retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = strategy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backpressure_matches_original_constant() {
        let opts = Options::default();
        match opts.backpressure_strategy {
            BackpressureStrategy::LimitSize(n) => assert_eq!(n, 262_144),
            _ => panic!("expected LimitSize"),
        }
    }

    #[test]
    fn empty_hmac_password_leaves_handshake_untouched() {
        let opts = Options::new().chain_hmac_handshake("");
        assert!(opts.handshake.is_none());
    }

    #[test]
    fn n_retries_zero_collapses_to_no_retries() {
        let strategy = RetryStrategy::n_retries(0);
        assert!(!strategy.active());
    }
}
