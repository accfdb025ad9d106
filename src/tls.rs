//! TLS configuration and the stream filter built on it.
//!
//! Mirrors `NetworkStream.hh`'s `tlsconfig`/`TlsFilter` pair. The original
//! wraps OpenSSL directly; we use `native-tls` so the same filter works
//! against whichever platform TLS backend is available.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use native_tls::{TlsConnector, TlsStream};

/// Corresponds to the fields qclient reads out of its `TlsConfig` struct.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub active: bool,
    pub ca_path: Option<String>,
    /// Whether the peer certificate chain is checked. Disabling this is a
    /// deliberate escape hatch for talking to a server with a self-signed
    /// certificate in development; never disable it in production.
    pub verify_peer: bool,
}

impl TlsConfig {
    pub fn disabled() -> Self {
        TlsConfig::default()
    }
}

/// Wraps a plain `TcpStream` in a TLS session once the handshake completes,
/// or passes bytes through untouched when TLS is not active. Matches the
/// `tlsfilter: unique_ptr<TlsFilter>` seam in `NetworkStream.hh` — every
/// stream has one, but it's a no-op unless `TlsConfig::active`.
pub enum TlsFilter {
    Plain(TcpStream),
    Encrypted(TlsStream<TcpStream>),
}

impl TlsFilter {
    /// Plain passthrough, no handshake performed.
    pub fn plain(stream: TcpStream) -> Self {
        TlsFilter::Plain(stream)
    }

    /// Perform the client-side TLS handshake against `domain`, consuming the
    /// raw stream. On failure the underlying socket is already consumed, so
    /// the caller must reconnect rather than retry the handshake.
    pub fn connect(config: &TlsConfig, domain: &str, stream: TcpStream) -> native_tls::Result<Self> {
        let mut builder = TlsConnector::builder();
        builder.danger_accept_invalid_certs(!config.verify_peer);
        let connector = builder.build()?;
        let tls_stream = connector.connect(domain, stream)?;
        Ok(TlsFilter::Encrypted(tls_stream))
    }

    pub fn shutdown(&mut self) -> io::Result<()> {
        match self {
            TlsFilter::Plain(s) => s.shutdown(std::net::Shutdown::Both),
            TlsFilter::Encrypted(s) => s.shutdown(),
        }
    }
}

impl Read for TlsFilter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            TlsFilter::Plain(s) => s.read(buf),
            TlsFilter::Encrypted(s) => s.read(buf),
        }
    }
}

impl Write for TlsFilter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TlsFilter::Plain(s) => s.write(buf),
            TlsFilter::Encrypted(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            TlsFilter::Plain(s) => s.flush(),
            TlsFilter::Encrypted(s) => s.flush(),
        }
    }
}
