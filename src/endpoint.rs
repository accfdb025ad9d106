//! C1 — `EndpointDecider`: which endpoint to dial next, given configured
//! members, redirects, and DNS resolution.
//!
//! Ported from `original_source/src/EndpointDecider.{hh,cc}`: a redirection,
//! once registered, overrides the very next `getNextEndpoint()` call; absent
//! that, members are tried round-robin. Resolved addresses for one `Endpoint`
//! are buffered in reverse so `pop_back` hands them out in resolution order.

use std::collections::VecDeque;
use std::net::SocketAddr;

use tracing::{info, warn};

/// `(host, port)` as configured by the user — unresolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Endpoint {
            host: host.into(),
            port,
        }
    }

    pub fn empty(&self) -> bool {
        self.host.is_empty() || self.port == 0
    }

    pub fn to_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint {
            host: String::new(),
            port: 0,
        }
    }
}

/// The configured cluster member list.
#[derive(Debug, Clone, Default)]
pub struct Members {
    endpoints: Vec<Endpoint>,
}

impl Members {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Members { endpoints }
    }

    pub fn from_single(host: impl Into<String>, port: u16) -> Self {
        Members {
            endpoints: vec![Endpoint::new(host, port)],
        }
    }

    pub fn size(&self) -> usize {
        self.endpoints.len()
    }

    pub fn get(&self, idx: usize) -> &Endpoint {
        &self.endpoints[idx]
    }
}

/// A fully resolved socket address, plus the hostname it came from, kept for
/// diagnostics (so a connect failure can still log which name was tried).
#[derive(Debug, Clone)]
pub struct ServiceEndpoint {
    pub addr: SocketAddr,
    pub original_hostname: String,
}

/// Interface `EndpointDecider` uses to turn an `Endpoint` into zero or more
/// `ServiceEndpoint`s. DNS resolution proper is treated as a pluggable seam
/// the caller supplies a resolver for, not reimplemented here.
pub trait HostResolver: Send + Sync {
    fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<SocketAddr>>;
}

/// Default resolver: plain `std::net::ToSocketAddrs`.
#[derive(Debug, Default)]
pub struct StdHostResolver;

impl HostResolver for StdHostResolver {
    fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<SocketAddr>> {
        use std::net::ToSocketAddrs;
        Ok((host, port).to_socket_addrs()?.collect())
    }
}

pub struct EndpointDecider {
    resolver: Box<dyn HostResolver>,
    members: Members,
    next_member: usize,
    full_circle: bool,
    redirection: Option<Endpoint>,
    resolved: VecDeque<ServiceEndpoint>,
}

impl EndpointDecider {
    pub fn new(resolver: Box<dyn HostResolver>, members: Members) -> Self {
        EndpointDecider {
            resolver,
            members,
            next_member: 0,
            full_circle: false,
            redirection: None,
            resolved: VecDeque::new(),
        }
    }

    /// We were just notified of a redirection; overrides the next
    /// `get_next_endpoint()` call once.
    pub fn register_redirection(&mut self, redir: Endpoint) {
        self.resolved.clear();
        self.redirection = Some(redir);
    }

    /// Which unresolved `Endpoint` should we target next?
    fn get_next(&mut self) -> Endpoint {
        self.resolved.clear();

        if let Some(redir) = self.redirection.take() {
            info!(target = %redir.to_string(), "received redirection");
            return redir;
        }

        let retval = self.members.get(self.next_member).clone();
        self.next_member = (self.next_member + 1) % self.members.size();
        retval
    }

    /// Get the next fully resolved `ServiceEndpoint`, ready to be passed to
    /// `connect()`. `None` means all DNS resolution attempts failed and a
    /// full circle has been made.
    pub fn get_next_endpoint(&mut self) -> Option<ServiceEndpoint> {
        if self.resolved.len() == 1 && self.next_member == 0 {
            self.full_circle = true;
        }

        if let Some(ep) = self.resolved.pop_back() {
            return Some(ep);
        }

        let attempts = self.members.size() + usize::from(self.redirection.is_some());
        for _ in 0..attempts {
            let endpoint = self.get_next();

            match self.resolver.resolve(&endpoint.host, endpoint.port) {
                Ok(addrs) if !addrs.is_empty() => {
                    let mut resolved: VecDeque<ServiceEndpoint> = addrs
                        .into_iter()
                        .map(|addr| ServiceEndpoint {
                            addr,
                            original_hostname: endpoint.host.clone(),
                        })
                        .collect();
                    // Refill in reverse so pop_back yields resolution order.
                    resolved.make_contiguous().reverse();
                    self.resolved = resolved;
                }
                Ok(_) => {
                    warn!(endpoint = %endpoint.to_string(), "DNS resolution returned no addresses");
                }
                Err(err) => {
                    warn!(endpoint = %endpoint.to_string(), error = %err, "DNS resolution failed");
                }
            }

            if self.resolved.len() == 1 && self.next_member == 0 {
                self.full_circle = true;
            }

            if let Some(ep) = self.resolved.pop_back() {
                return Some(ep);
            }
        }

        self.full_circle = true;
        None
    }

    /// Have we tried every configured endpoint at least once?
    pub fn made_full_circle(&self) -> bool {
        self.full_circle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;

    struct FixedResolver(Mutex<Vec<(String, u16, Vec<SocketAddr>)>>);

    impl HostResolver for FixedResolver {
        fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<SocketAddr>> {
            let table = self.0.lock().unwrap();
            for (h, p, addrs) in table.iter() {
                if h == host && *p == port {
                    return Ok(addrs.clone());
                }
            }
            Ok(vec![])
        }
    }

    fn addr(last: u8, port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, last)), port)
    }

    #[test]
    fn round_robins_through_members_and_detects_full_circle() {
        let resolver = FixedResolver(Mutex::new(vec![
            ("a".into(), 1, vec![addr(1, 1)]),
            ("b".into(), 2, vec![addr(2, 2)]),
        ]));
        let members = Members::new(vec![Endpoint::new("a", 1), Endpoint::new("b", 2)]);
        let mut decider = EndpointDecider::new(Box::new(resolver), members);

        assert!(!decider.made_full_circle());
        let e1 = decider.get_next_endpoint().unwrap();
        assert_eq!(e1.addr, addr(1, 1));
        let e2 = decider.get_next_endpoint().unwrap();
        assert_eq!(e2.addr, addr(2, 2));
        // Third call wraps back to member 0 - this is the full circle point.
        let e3 = decider.get_next_endpoint().unwrap();
        assert_eq!(e3.addr, addr(1, 1));
        assert!(decider.made_full_circle());
    }

    #[test]
    fn redirection_overrides_next_pick_once() {
        let resolver = FixedResolver(Mutex::new(vec![
            ("a".into(), 1, vec![addr(1, 1)]),
            ("redirect-target".into(), 9, vec![addr(9, 9)]),
        ]));
        let members = Members::new(vec![Endpoint::new("a", 1)]);
        let mut decider = EndpointDecider::new(Box::new(resolver), members);

        decider.register_redirection(Endpoint::new("redirect-target", 9));
        let e1 = decider.get_next_endpoint().unwrap();
        assert_eq!(e1.addr, addr(9, 9));

        // Back to round-robin over members afterwards.
        let e2 = decider.get_next_endpoint().unwrap();
        assert_eq!(e2.addr, addr(1, 1));
    }

    #[test]
    fn all_resolution_failures_yield_none_and_full_circle() {
        let resolver = FixedResolver(Mutex::new(vec![]));
        let members = Members::new(vec![Endpoint::new("a", 1), Endpoint::new("b", 2)]);
        let mut decider = EndpointDecider::new(Box::new(resolver), members);

        assert!(decider.get_next_endpoint().is_none());
        assert!(decider.made_full_circle());
    }
}
