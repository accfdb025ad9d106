//! `Client` — owns a connection to the cluster: dialing, the handshake,
//! automatic reconnection with backoff, transparent `MOVED` redirects, and
//! the seams (`CommandSink`, `ChannelPublisher`, `SubscriptionSink`) that
//! every higher layer (flusher, shared structures, pub/sub) submits
//! through.
//!
//! Ported from `original_source/include/qclient/QClient.hh` and the
//! `eventLoopThread`/`writerThread` split described there. We keep one
//! long-lived `ConnectionCore` for the client's whole life and call
//! `ConnectionCore::reconnection()` whenever a fresh socket replaces the
//! old one, rather than building a new core per TCP attempt — the core's
//! queue and handshake state already know how to replay across that event.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mio::{Poll, Token, Waker};
use socket2::Socket;
use tracing::{info, warn};

use crate::backpressure::Backpressure;
use crate::connector::AsyncConnector;
use crate::core::ConnectionCore;
use crate::endpoint::{Endpoint, EndpointDecider, HostResolver, Members, ServiceEndpoint, StdHostResolver};
use crate::fault_injector::FaultInjector;
use crate::future::QFuture;
use crate::handshake::Handshake;
use crate::options::{Options, RetryStrategy};
use crate::pubsub::base_subscriber::SubscriptionSink;
use crate::pubsub::message::{Message, MessageType};
use crate::pubsub::subscriber::Subscriber;
use crate::reader::{PushHandler, Reader};
use crate::request::EncodedRequest;
use crate::shared::communicator::ChannelPublisher;
use crate::stream::NetworkStream;
use crate::tls::TlsConfig;
use crate::types::{Reply, Value};
use crate::writer::Writer;

struct ConnGuards {
    #[allow(dead_code)]
    stream: Arc<Mutex<NetworkStream>>,
    writer: Writer,
    reader: Reader,
}

pub struct Client {
    core: Arc<ConnectionCore>,
    decider: Mutex<EndpointDecider>,
    retry_strategy: RetryStrategy,
    tls_config: TlsConfig,
    transparent_redirects: bool,
    conn: Mutex<Option<ConnGuards>>,
    shutdown: Arc<AtomicBool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    subscriber: Arc<Subscriber>,
    fault_injector: Arc<FaultInjector>,
    weak_self: Weak<Client>,
}

/// Delegates to the client that owns it, upgrading its weak handle each
/// time. A no-op once the client has been dropped.
struct WeakClientSink(Weak<Client>);

impl SubscriptionSink for WeakClientSink {
    fn subscribe(&self, channel: &str) {
        if let Some(client) = self.0.upgrade() {
            client.issue_subscription_command(b"SUBSCRIBE", channel);
        }
    }
    fn psubscribe(&self, pattern: &str) {
        if let Some(client) = self.0.upgrade() {
            client.issue_subscription_command(b"PSUBSCRIBE", pattern);
        }
    }
    fn unsubscribe(&self, channel: &str) {
        if let Some(client) = self.0.upgrade() {
            client.issue_subscription_command(b"UNSUBSCRIBE", channel);
        }
    }
    fn punsubscribe(&self, pattern: &str) {
        if let Some(client) = self.0.upgrade() {
            client.issue_subscription_command(b"PUNSUBSCRIBE", pattern);
        }
    }
}

impl Client {
    pub fn new(members: Members, options: Options) -> Arc<Self> {
        Self::with_resolver(members, options, Box::new(StdHostResolver))
    }

    pub fn with_resolver(members: Members, mut options: Options, resolver: Box<dyn HostResolver>) -> Arc<Self> {
        let handshake: Box<dyn Handshake> = options
            .handshake
            .take()
            .unwrap_or_else(|| Box::new(crate::handshake::PingHandshake::default()));
        let backpressure = Arc::new(Backpressure::new(options.backpressure_strategy));
        let core = Arc::new(ConnectionCore::new(handshake, backpressure));
        let decider = Mutex::new(EndpointDecider::new(resolver, members));
        let retry_strategy = options.retry_strategy;
        let tls_config = options.tls_config;
        let transparent_redirects = options.transparent_redirects;

        let client = Arc::new_cyclic(|weak| Client {
            core,
            decider,
            retry_strategy,
            tls_config,
            transparent_redirects,
            conn: Mutex::new(None),
            shutdown: Arc::new(AtomicBool::new(false)),
            supervisor: Mutex::new(None),
            subscriber: Arc::new(Subscriber::new(Box::new(WeakClientSink(weak.clone())))),
            fault_injector: Arc::new(FaultInjector::new()),
            weak_self: weak.clone(),
        });

        let supervisor_client = client.clone();
        let handle = thread::Builder::new()
            .name("qclient-supervisor".into())
            .spawn(move || Client::supervisor_loop(supervisor_client))
            .expect("spawn qclient-supervisor thread");
        *client.supervisor.lock().unwrap() = Some(handle);

        client
    }

    pub fn fault_injector(&self) -> Arc<FaultInjector> {
        self.fault_injector.clone()
    }

    pub fn subscriber(&self) -> Arc<Subscriber> {
        self.subscriber.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.core.pending_count()
    }

    /// Submit a command and block until its reply arrives (or the client
    /// is torn down, in which case the reply is `Value::Nil`).
    pub fn execute<I, A>(&self, args: I) -> Reply
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        self.submit(EncodedRequest::from_args(args)).wait()
    }

    fn submit(&self, encoded: EncodedRequest) -> QFuture<Reply> {
        self.core.stage(encoded, 0)
    }

    fn issue_subscription_command(&self, verb: &[u8], target: &str) {
        let _ = self.submit(EncodedRequest::from_args([verb.to_vec(), target.as_bytes().to_vec()]));
    }

    fn should_retry(&self, attempt: i64, elapsed: Duration) -> bool {
        match self.retry_strategy {
            RetryStrategy::NoRetries => false,
            RetryStrategy::InfiniteRetries => true,
            RetryStrategy::WithTimeout(d) => elapsed < d,
            RetryStrategy::NRetries(n) => attempt <= n,
        }
    }

    fn supervisor_loop(client: Arc<Client>) {
        let mut attempt: i64 = 0;
        let started = Instant::now();

        loop {
            if client.shutdown.load(Ordering::Acquire) {
                return;
            }

            match client.dial_next() {
                Some(guards) => {
                    attempt = 0;
                    client.core.reconnection();
                    *client.conn.lock().unwrap() = Some(guards);
                    client.subscriber.resubscribe_all();
                    client.wait_until_broken_or_shutdown();
                }
                None => {
                    thread::sleep(Duration::from_millis(50));
                }
            }

            if client.shutdown.load(Ordering::Acquire) {
                return;
            }

            attempt += 1;
            if !client.should_retry(attempt, started.elapsed()) {
                warn!("retry strategy exhausted, giving up on the connection");
                client.core.clear_all_pending();
                return;
            }

            thread::sleep(Self::backoff_for(attempt));
        }
    }

    fn backoff_for(attempt: i64) -> Duration {
        let capped = attempt.clamp(1, 10) as u64;
        Duration::from_millis(100 * capped)
    }

    fn wait_until_broken_or_shutdown(&self) {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }
            let broken = {
                let conn = self.conn.lock().unwrap();
                match conn.as_ref() {
                    Some(guards) => guards.writer.is_broken() || guards.reader.is_broken(),
                    None => true,
                }
            };
            if broken {
                return;
            }
            thread::sleep(Duration::from_millis(50));
        }
    }

    fn dial_next(&self) -> Option<ConnGuards> {
        loop {
            let endpoint = {
                let mut decider = self.decider.lock().unwrap();
                decider.get_next_endpoint()?
            };

            let partition_key = Endpoint::new(endpoint.original_hostname.clone(), endpoint.addr.port());
            if self.fault_injector.has_partition(&partition_key) {
                thread::sleep(Duration::from_millis(20));
                continue;
            }

            return match self.try_connect(&endpoint) {
                Ok(guards) => {
                    info!(endpoint = %endpoint.addr, "connected");
                    Some(guards)
                }
                Err(err) => {
                    warn!(endpoint = %endpoint.addr, error = %err, "connect failed");
                    None
                }
            };
        }
    }

    fn try_connect(&self, endpoint: &ServiceEndpoint) -> io::Result<ConnGuards> {
        let mut connector = AsyncConnector::new(endpoint);
        let scratch_poll = Poll::new()?;
        let waker = Waker::new(scratch_poll.registry(), Token(0))?;
        connector.block_until_ready(&waker)?;

        if !connector.ok() {
            if let Some(err) = connector.error() {
                return Err(io::Error::new(err.kind(), err.to_string()));
            }
            return Err(io::Error::new(io::ErrorKind::Other, "connect failed"));
        }

        let mio_stream = connector
            .release()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "no socket to hand off"))?;
        let std_stream = into_blocking_std_stream(mio_stream)?;

        let network_stream = NetworkStream::new(std_stream, &self.tls_config, &endpoint.original_hostname)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        let stream = Arc::new(Mutex::new(network_stream));

        let writer = Writer::spawn(self.core.clone(), stream.clone());

        let client = self
            .weak_self
            .upgrade()
            .expect("client outlives its own connection attempts");
        let on_push: PushHandler = Arc::new(move |reply: Reply| client.handle_push_frame(reply));

        let reader = Reader::spawn(self.core.clone(), stream.clone(), self.shutdown.clone(), on_push);

        Ok(ConnGuards { stream, writer, reader })
    }

    fn handle_push_frame(&self, reply: Reply) {
        if let Some((host, port)) = reply.parse_moved() {
            if self.transparent_redirects {
                self.decider.lock().unwrap().register_redirection(Endpoint::new(host, port));
            }
            return;
        }
        if let Some(msg) = decode_push_message(&reply) {
            self.subscriber.dispatch(msg);
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.core.set_blocking_mode(false);
        *self.conn.lock().unwrap() = None;
        if let Some(handle) = self.supervisor.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.core.clear_all_pending();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl crate::flusher::background::CommandSink for Client {
    fn submit(&self, request: EncodedRequest) -> QFuture<Reply> {
        self.core.stage(request, 0)
    }
}

impl ChannelPublisher for Client {
    fn publish(&self, channel: &str, payload: &[u8]) {
        let _ = self.submit(EncodedRequest::from_args([
            b"PUBLISH".to_vec(),
            channel.as_bytes().to_vec(),
            payload.to_vec(),
        ]));
    }
}

impl SubscriptionSink for Client {
    fn subscribe(&self, channel: &str) {
        self.issue_subscription_command(b"SUBSCRIBE", channel);
    }
    fn psubscribe(&self, pattern: &str) {
        self.issue_subscription_command(b"PSUBSCRIBE", pattern);
    }
    fn unsubscribe(&self, channel: &str) {
        self.issue_subscription_command(b"UNSUBSCRIBE", channel);
    }
    fn punsubscribe(&self, pattern: &str) {
        self.issue_subscription_command(b"PUNSUBSCRIBE", pattern);
    }
}

fn into_blocking_std_stream(mio_stream: mio::net::TcpStream) -> io::Result<std::net::TcpStream> {
    use std::os::unix::io::{FromRawFd, IntoRawFd};
    let raw = mio_stream.into_raw_fd();
    let socket = unsafe { Socket::from_raw_fd(raw) };
    socket.set_nonblocking(false)?;
    Ok(socket.into())
}

/// Decode a RESP3 push frame into a pub/sub `Message`. The first element is
/// always the message-type label; the rest depend on it.
fn decode_push_message(reply: &Reply) -> Option<Message> {
    let items = reply.as_array()?;
    let label: Vec<u8> = match items.first()? {
        Value::Data(d) => d.clone(),
        Value::Status(s) => s.as_bytes().to_vec(),
        _ => return None,
    };

    match label.as_slice() {
        b"message" => {
            let channel = items.get(1)?.as_data()?;
            let payload = items.get(2)?.as_data()?;
            Some(Message::new_message(
                String::from_utf8_lossy(channel).into_owned(),
                payload.to_vec(),
            ))
        }
        b"pmessage" => {
            let pattern = items.get(1)?.as_data()?;
            let channel = items.get(2)?.as_data()?;
            let payload = items.get(3)?.as_data()?;
            Some(Message::new_pattern_message(
                String::from_utf8_lossy(channel).into_owned(),
                String::from_utf8_lossy(pattern).into_owned(),
                payload.to_vec(),
            ))
        }
        b"subscribe" | b"unsubscribe" | b"psubscribe" | b"punsubscribe" => {
            let name = items.get(1)?.as_data()?;
            let count = match items.get(2)? {
                Value::Int(n) => *n as i32,
                _ => 0,
            };
            let message_type = match label.as_slice() {
                b"subscribe" => MessageType::Subscribe,
                b"unsubscribe" => MessageType::Unsubscribe,
                b"psubscribe" => MessageType::PatternSubscribe,
                _ => MessageType::PatternUnsubscribe,
            };
            Some(Message::new_subscribe_ack(
                message_type,
                String::from_utf8_lossy(name).into_owned(),
                count,
            ))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_message_push_frame() {
        let reply: Reply = Arc::new(Value::Push(vec![
            Value::Data(b"message".to_vec()),
            Value::Data(b"chan".to_vec()),
            Value::Data(b"hello".to_vec()),
        ]));
        let msg = decode_push_message(&reply).unwrap();
        assert_eq!(msg.message_type, MessageType::Message);
        assert_eq!(msg.channel, "chan");
        assert_eq!(msg.payload, b"hello");
    }

    #[test]
    fn decodes_pattern_message_push_frame() {
        let reply: Reply = Arc::new(Value::Push(vec![
            Value::Data(b"pmessage".to_vec()),
            Value::Data(b"chan.*".to_vec()),
            Value::Data(b"chan.1".to_vec()),
            Value::Data(b"hi".to_vec()),
        ]));
        let msg = decode_push_message(&reply).unwrap();
        assert!(msg.has_pattern());
        assert_eq!(msg.pattern, "chan.*");
        assert_eq!(msg.channel, "chan.1");
    }

    #[test]
    fn decodes_subscribe_ack_push_frame() {
        let reply: Reply = Arc::new(Value::Push(vec![
            Value::Data(b"subscribe".to_vec()),
            Value::Data(b"chan".to_vec()),
            Value::Int(1),
        ]));
        let msg = decode_push_message(&reply).unwrap();
        assert_eq!(msg.message_type, MessageType::Subscribe);
        assert_eq!(msg.active_subscriptions, 1);
    }

    #[test]
    fn ignores_unrecognized_push_label() {
        let reply: Reply = Arc::new(Value::Push(vec![Value::Data(b"unknown".to_vec())]));
        assert!(decode_push_message(&reply).is_none());
    }

    #[test]
    fn backoff_grows_then_caps() {
        assert_eq!(Client::backoff_for(1), Duration::from_millis(100));
        assert_eq!(Client::backoff_for(5), Duration::from_millis(500));
        assert_eq!(Client::backoff_for(50), Duration::from_millis(1000));
    }
}
