//! Connection handshakes — the first request(s) sent on a freshly opened
//! socket, before any user command is allowed through.
//!
//! Ported from `original_source/include/qclient/Handshake.hh` and
//! `src/Handshake.cc`.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    Invalid,
    ValidIncomplete,
    ValidComplete,
}

/// Defines the first request(s) to send on a freshly opened connection and
/// validates each response. An `Invalid` verdict at any point tears the
/// connection down and retries from scratch.
pub trait Handshake: Send {
    fn provide_handshake(&mut self) -> Vec<Vec<u8>>;
    fn validate_response(&mut self, reply: &Value) -> HandshakeStatus;
    fn restart(&mut self);
}

/// Plain-password `AUTH`.
pub struct AuthHandshake {
    password: String,
}

impl AuthHandshake {
    pub fn new(password: impl Into<String>) -> Self {
        AuthHandshake {
            password: password.into(),
        }
    }
}

impl Handshake for AuthHandshake {
    fn provide_handshake(&mut self) -> Vec<Vec<u8>> {
        vec![b"AUTH".to_vec(), self.password.clone().into_bytes()]
    }

    fn validate_response(&mut self, reply: &Value) -> HandshakeStatus {
        match reply.as_status() {
            Some("OK") => HandshakeStatus::ValidComplete,
            _ => HandshakeStatus::Invalid,
        }
    }

    fn restart(&mut self) {}
}

type HmacSha256 = Hmac<Sha256>;

/// Solve an HMAC-SHA256 challenge to authenticate without ever putting the
/// password on the wire.
pub struct HmacAuthHandshake {
    password: String,
    initiated: bool,
    received_challenge: bool,
    random_bytes: Vec<u8>,
    string_to_sign: Vec<u8>,
}

impl HmacAuthHandshake {
    pub fn new(password: impl Into<String>) -> Self {
        HmacAuthHandshake {
            password: password.into(),
            initiated: false,
            received_challenge: false,
            random_bytes: Vec::new(),
            string_to_sign: Vec::new(),
        }
    }

    fn generate_secure_random_bytes(nbytes: usize) -> Vec<u8> {
        let mut buf = vec![0u8; nbytes];
        rand::thread_rng().fill_bytes(&mut buf);
        buf
    }

    fn generate_signature(&self) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(self.password.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(&self.string_to_sign);
        mac.finalize().into_bytes().to_vec()
    }
}

impl Handshake for HmacAuthHandshake {
    fn provide_handshake(&mut self) -> Vec<Vec<u8>> {
        if !self.initiated {
            self.initiated = true;
            self.random_bytes = Self::generate_secure_random_bytes(64);
            return vec![
                b"HMAC-AUTH-GENERATE-CHALLENGE".to_vec(),
                self.random_bytes.clone(),
            ];
        }

        vec![
            b"HMAC-AUTH-VALIDATE-CHALLENGE".to_vec(),
            self.generate_signature(),
        ]
    }

    fn validate_response(&mut self, reply: &Value) -> HandshakeStatus {
        if reply.is_error() {
            return HandshakeStatus::Invalid;
        }

        if !self.received_challenge {
            let data = match reply.as_data() {
                Some(d) => d,
                None => return HandshakeStatus::Invalid,
            };

            self.string_to_sign = data.to_vec();
            self.received_challenge = true;

            if !self.string_to_sign.starts_with(&self.random_bytes) {
                return HandshakeStatus::Invalid;
            }

            return HandshakeStatus::ValidIncomplete;
        }

        match reply.as_status() {
            Some("OK") => HandshakeStatus::ValidComplete,
            _ => HandshakeStatus::Invalid,
        }
    }

    fn restart(&mut self) {
        self.initiated = false;
        self.received_challenge = false;
        self.random_bytes.clear();
        self.string_to_sign.clear();
    }
}

/// A liveness `PING` sent right after connecting, independent of
/// authentication — confirms the server is actually responsive, not just
/// accepting TCP connections.
pub struct PingHandshake {
    ping_to_send: String,
}

impl PingHandshake {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        PingHandshake {
            ping_to_send: if text.is_empty() {
                "qclient-connection-initialization".to_string()
            } else {
                text
            },
        }
    }
}

impl Default for PingHandshake {
    fn default() -> Self {
        PingHandshake::new(String::new())
    }
}

impl Handshake for PingHandshake {
    fn provide_handshake(&mut self) -> Vec<Vec<u8>> {
        vec![b"PING".to_vec(), self.ping_to_send.clone().into_bytes()]
    }

    fn validate_response(&mut self, reply: &Value) -> HandshakeStatus {
        match reply.as_data() {
            Some(d) if d == self.ping_to_send.as_bytes() => HandshakeStatus::ValidComplete,
            _ => HandshakeStatus::Invalid,
        }
    }

    fn restart(&mut self) {}
}

/// Ask the server to start sending RESP3-style out-of-band push messages
/// (invalidation notices, pub/sub deliveries interleaved with replies).
pub struct ActivatePushTypesHandshake;

impl Handshake for ActivatePushTypesHandshake {
    fn provide_handshake(&mut self) -> Vec<Vec<u8>> {
        vec![b"ACTIVATE-PUSH-TYPES".to_vec()]
    }

    fn validate_response(&mut self, reply: &Value) -> HandshakeStatus {
        match reply.as_status() {
            Some("OK") => HandshakeStatus::ValidComplete,
            _ => HandshakeStatus::Invalid,
        }
    }

    fn restart(&mut self) {}
}

/// Chains two handshakes: run the first to completion, then the second.
/// `restart()` resets both and starts over from the first.
pub struct HandshakeChainer {
    first_done: bool,
    first: Box<dyn Handshake>,
    second: Box<dyn Handshake>,
}

impl HandshakeChainer {
    pub fn new(first: Box<dyn Handshake>, second: Box<dyn Handshake>) -> Self {
        HandshakeChainer {
            first_done: false,
            first,
            second,
        }
    }
}

impl Handshake for HandshakeChainer {
    fn provide_handshake(&mut self) -> Vec<Vec<u8>> {
        if !self.first_done {
            self.first.provide_handshake()
        } else {
            self.second.provide_handshake()
        }
    }

    fn validate_response(&mut self, reply: &Value) -> HandshakeStatus {
        if !self.first_done {
            let status = self.first.validate_response(reply);
            if status == HandshakeStatus::ValidComplete {
                self.first_done = true;
                return HandshakeStatus::ValidIncomplete;
            }
            return status;
        }

        self.second.validate_response(reply)
    }

    fn restart(&mut self) {
        self.first_done = false;
        self.first.restart();
        self.second.restart();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_handshake_accepts_ok_status() {
        let mut h = AuthHandshake::new("secret");
        assert_eq!(h.provide_handshake(), vec![b"AUTH".to_vec(), b"secret".to_vec()]);
        assert_eq!(
            h.validate_response(&Value::Status("OK".into())),
            HandshakeStatus::ValidComplete
        );
    }

    #[test]
    fn auth_handshake_rejects_anything_else() {
        let mut h = AuthHandshake::new("secret");
        assert_eq!(
            h.validate_response(&Value::Error("WRONGPASS".into())),
            HandshakeStatus::Invalid
        );
    }

    #[test]
    fn hmac_handshake_round_trips_challenge() {
        let mut h = HmacAuthHandshake::new("secret");
        let first = h.provide_handshake();
        assert_eq!(first[0], b"HMAC-AUTH-GENERATE-CHALLENGE");
        let random_bytes = h.random_bytes.clone();

        let mut challenge = random_bytes.clone();
        challenge.extend_from_slice(b"-server-suffix");
        let status = h.validate_response(&Value::Data(challenge));
        assert_eq!(status, HandshakeStatus::ValidIncomplete);

        let second = h.provide_handshake();
        assert_eq!(second[0], b"HMAC-AUTH-VALIDATE-CHALLENGE");
        assert_eq!(
            h.validate_response(&Value::Status("OK".into())),
            HandshakeStatus::ValidComplete
        );
    }

    #[test]
    fn hmac_handshake_rejects_challenge_not_built_on_our_bytes() {
        let mut h = HmacAuthHandshake::new("secret");
        h.provide_handshake();
        let status = h.validate_response(&Value::Data(b"something-else".to_vec()));
        assert_eq!(status, HandshakeStatus::Invalid);
    }

    #[test]
    fn chainer_runs_first_then_second() {
        let mut chain = HandshakeChainer::new(
            Box::new(AuthHandshake::new("pw")),
            Box::new(PingHandshake::default()),
        );
        assert_eq!(
            chain.validate_response(&Value::Status("OK".into())),
            HandshakeStatus::ValidIncomplete
        );
        let ping = chain.provide_handshake();
        assert_eq!(ping[0], b"PING");
    }
}
