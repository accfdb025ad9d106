//! `FaultInjector` — lets a test deliberately cut a client off from the
//! server cluster, either entirely or one endpoint at a time. Only network
//! partitions are modeled.
//!
//! Ported from `original_source/include/qclient/FaultInjector.hh`. The
//! original makes its constructor private and `QClient` a friend; we get
//! the same effect with a `pub(crate)` constructor that only `client.rs`
//! can call.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::endpoint::Endpoint;

#[derive(Default)]
struct State {
    partitions: HashSet<Endpoint>,
    total_blackout: bool,
}

pub struct FaultInjector {
    state: Mutex<State>,
}

impl FaultInjector {
    pub(crate) fn new() -> Self {
        FaultInjector {
            state: Mutex::new(State::default()),
        }
    }

    /// This client cannot communicate with anyone until `lift_total_blackout`.
    pub fn enforce_total_blackout(&self) {
        self.state.lock().unwrap().total_blackout = true;
    }

    /// Explicitly added partitions still take effect.
    pub fn lift_total_blackout(&self) {
        self.state.lock().unwrap().total_blackout = false;
    }

    pub fn add_partition(&self, endpoint: Endpoint) {
        self.state.lock().unwrap().partitions.insert(endpoint);
    }

    pub fn heal_partition(&self, endpoint: &Endpoint) {
        self.state.lock().unwrap().partitions.remove(endpoint);
    }

    /// Does not affect the total blackout setting, just explicitly added
    /// partitions.
    pub fn heal_all_partitions(&self) {
        self.state.lock().unwrap().partitions.clear();
    }

    pub fn has_partition(&self, endpoint: &Endpoint) -> bool {
        let state = self.state.lock().unwrap();
        state.total_blackout || state.partitions.contains(endpoint)
    }
}

impl Default for FaultInjector {
    fn default() -> Self {
        FaultInjector::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_blackout_blocks_every_endpoint() {
        let injector = FaultInjector::new();
        let endpoint = Endpoint::new("localhost", 6379);
        assert!(!injector.has_partition(&endpoint));

        injector.enforce_total_blackout();
        assert!(injector.has_partition(&endpoint));

        injector.lift_total_blackout();
        assert!(!injector.has_partition(&endpoint));
    }

    #[test]
    fn explicit_partition_survives_blackout_lift() {
        let injector = FaultInjector::new();
        let blocked = Endpoint::new("node-a", 7777);
        let fine = Endpoint::new("node-b", 7777);

        injector.add_partition(blocked.clone());
        assert!(injector.has_partition(&blocked));
        assert!(!injector.has_partition(&fine));

        injector.heal_partition(&blocked);
        assert!(!injector.has_partition(&blocked));
    }

    #[test]
    fn heal_all_partitions_clears_the_blacklist_only() {
        let injector = FaultInjector::new();
        injector.add_partition(Endpoint::new("node-a", 1));
        injector.add_partition(Endpoint::new("node-b", 1));
        injector.enforce_total_blackout();

        injector.heal_all_partitions();
        assert!(!injector.has_partition(&Endpoint::new("node-a", 1)));
        assert!(injector.has_partition(&Endpoint::new("anything", 1)));
    }
}
