//! Connection state table for the balancer.

use crate::balancer::pool::Backend;
use crate::flow::{FlowKey, TcpState};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, RwLock};

/// State of a single terminated client flow.
#[derive(Debug)]
pub struct BalancerConn {
    /// Handshake progress.
    pub state: TcpState,

    /// Initial sequence number chosen for the SYN-ACK.
    pub isn: u32,

    /// Backend pinned on the first data segment. Immutable once set.
    pub server: Option<Backend>,
}

/// Table of client flows, keyed by the client's address and port.
///
/// Lookups take a shared lock; only flow creation takes the exclusive
/// lock. Entries are never evicted.
#[derive(Debug)]
pub struct StateTable {
    conns: RwLock<HashMap<FlowKey, Arc<Mutex<BalancerConn>>>>,

    /// Long-lived ISN generator.
    rng: Mutex<SmallRng>,
}

impl Default for StateTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            conns: RwLock::new(HashMap::new()),
            rng: Mutex::new(SmallRng::from_entropy()),
        }
    }

    /// Insert a fresh flow with a random initial sequence number.
    pub fn insert(&self, ip: Ipv4Addr, port: u16) -> Arc<Mutex<BalancerConn>> {
        let isn = self.rng.lock().unwrap().gen();
        let conn = Arc::new(Mutex::new(BalancerConn {
            state: TcpState::Closed,
            isn,
            server: None,
        }));
        let mut conns = self.conns.write().unwrap();
        conns.insert(FlowKey::new(ip, port), Arc::clone(&conn));
        conn
    }

    /// Look up a flow by client endpoint.
    pub fn get(&self, ip: Ipv4Addr, port: u16) -> Option<Arc<Mutex<BalancerConn>>> {
        let conns = self.conns.read().unwrap();
        conns.get(&FlowKey::new(ip, port)).cloned()
    }

    /// Number of tracked flows.
    pub fn len(&self) -> usize {
        self.conns.read().unwrap().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
