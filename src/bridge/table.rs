//! Dual-index connection state table for the packet bridge.

use crate::bridge::error::{BridgeError, BridgeResult};
use crate::flow::{FlowKey, TcpState};
use crate::wire::MacAddr;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, RwLock};

/// Attempts made to find a free ephemeral port before giving up. The
/// table is expected to stay sparse relative to the 16-bit port space.
const MAX_PORT_ATTEMPTS: usize = 128;

/// State of a single spliced flow.
#[derive(Debug)]
pub struct BridgeConn {
    /// Original client IPv4 address.
    pub client_ip: Ipv4Addr,

    /// Original client MAC, the L2 destination on the return path.
    pub client_mac: MacAddr,

    /// Original client TCP port.
    pub client_port: u16,

    /// Balancer index copied from the tagged frame's TOS byte. Picks the
    /// source IP for return-path frames.
    pub lb_index: u8,

    /// Our source port toward the backend; also the lookup key for
    /// backend replies.
    pub ephemeral_port: u16,

    /// Additive constant joining the two sequence spaces. Holds the
    /// client-side expected server sequence until the backend handshake
    /// completes, the final wrapping offset afterwards.
    pub seq_offset: u32,

    /// Splice progress.
    pub state: TcpState,

    /// First client payload, replayed to the backend once the handshake
    /// completes.
    pub payload_buf: Vec<u8>,
}

/// Both lookup indexes live behind one lock so the ephemeral-port search
/// and the dual insert form a single critical section.
#[derive(Debug)]
struct Indexes {
    by_client: HashMap<FlowKey, Arc<Mutex<BridgeConn>>>,
    by_port: HashMap<u16, Arc<Mutex<BridgeConn>>>,
    rng: SmallRng,
}

/// Table of spliced flows, indexed by client endpoint and by ephemeral
/// port. Entries are never evicted.
#[derive(Debug)]
pub struct BridgeTable {
    indexes: RwLock<Indexes>,
}

impl Default for BridgeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            indexes: RwLock::new(Indexes {
                by_client: HashMap::new(),
                by_port: HashMap::new(),
                rng: SmallRng::from_entropy(),
            }),
        }
    }

    /// Install a new flow under a freshly allocated ephemeral port,
    /// visible through both indexes.
    ///
    /// `seq_offset` is the tagged frame's acknowledgement number (the
    /// client's next expected server sequence); `payload` is the first
    /// client payload, held for replay.
    pub fn insert(
        &self,
        client_ip: Ipv4Addr,
        client_mac: MacAddr,
        client_port: u16,
        lb_index: u8,
        seq_offset: u32,
        payload: Vec<u8>,
    ) -> BridgeResult<Arc<Mutex<BridgeConn>>> {
        let mut indexes = self.indexes.write().unwrap();

        let mut ephemeral_port = 0u16;
        for attempt in 0..=MAX_PORT_ATTEMPTS {
            if attempt == MAX_PORT_ATTEMPTS {
                return Err(BridgeError::EphemeralPortExhausted(MAX_PORT_ATTEMPTS));
            }
            // Port 0 is not a usable source port.
            let candidate = indexes.rng.gen_range(1..=u16::MAX);
            if !indexes.by_port.contains_key(&candidate) {
                ephemeral_port = candidate;
                break;
            }
        }

        let conn = Arc::new(Mutex::new(BridgeConn {
            client_ip,
            client_mac,
            client_port,
            lb_index,
            ephemeral_port,
            seq_offset,
            state: TcpState::Closed,
            payload_buf: payload,
        }));
        indexes
            .by_client
            .insert(FlowKey::new(client_ip, client_port), Arc::clone(&conn));
        indexes.by_port.insert(ephemeral_port, Arc::clone(&conn));
        Ok(conn)
    }

    /// Look up a flow by the original client endpoint.
    pub fn get_by_client(&self, ip: Ipv4Addr, port: u16) -> Option<Arc<Mutex<BridgeConn>>> {
        let indexes = self.indexes.read().unwrap();
        indexes.by_client.get(&FlowKey::new(ip, port)).cloned()
    }

    /// Look up a flow by its ephemeral port.
    pub fn get_by_port(&self, port: u16) -> Option<Arc<Mutex<BridgeConn>>> {
        let indexes = self.indexes.read().unwrap();
        indexes.by_port.get(&port).cloned()
    }

    /// Number of tracked flows.
    pub fn len(&self) -> usize {
        self.indexes.read().unwrap().by_port.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
