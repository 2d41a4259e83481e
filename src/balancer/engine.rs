//! Packet-level balancing engine.
//!
//! Terminates the client handshake without a backend, pins a backend on
//! the first data segment, and rewrites L2/L3 headers so tagged frames
//! reach the packet bridge while keeping the client's TCP identity
//! intact.

use crate::balancer::pool::{BackendPool, RouteHint};
use crate::balancer::table::StateTable;
use crate::flow::{TcpState, ADVERTISED_WINDOW, OUTBOUND_TTL};
use crate::wire::{Frame, TcpFlags, TcpSegment};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-frame balancing state machine.
///
/// `process` is pure with respect to I/O: it consumes a decoded frame and
/// returns the frame to emit, if any. The caller owns capture and
/// injection.
pub struct BalancerEngine {
    table: Arc<StateTable>,
    pool: Arc<dyn BackendPool>,
}

impl BalancerEngine {
    /// Create an engine over a state table and a backend pool.
    pub fn new(table: Arc<StateTable>, pool: Arc<dyn BackendPool>) -> Self {
        Self { table, pool }
    }

    /// Run one captured frame through the state machine.
    pub fn process(&self, mut frame: Frame) -> Option<Frame> {
        let client_ip = frame.ip.src;
        let client_port = frame.tcp.src_port;

        let conn = match self.table.get(client_ip, client_port) {
            Some(conn) => conn,
            None => return self.open_flow(frame),
        };
        let mut conn = conn.lock().unwrap();

        if conn.state == TcpState::SynReceived && frame.tcp.flags.contains(TcpFlags::ACK) {
            conn.state = TcpState::Established;
            info!(client = %client_ip, port = client_port, "handshake completed");
        } else if conn.state == TcpState::Established
            && conn.server.is_none()
            && frame.tcp.flags.contains(TcpFlags::ACK | TcpFlags::PSH)
        {
            // First data segment: pin the backend for the rest of the flow.
            // The request is assumed to fit in one segment.
            let hint = RouteHint::from_payload(&frame.tcp.payload);
            match self.pool.route(&hint) {
                Ok(server) => {
                    info!(
                        client = %client_ip, port = client_port, backend = %server.ipv4,
                        hint = hint.as_str(), "backend pinned"
                    );
                    conn.server = Some(server);
                },
                Err(e) => {
                    warn!(client = %client_ip, port = client_port, error = %e, "dropping data segment");
                    return None;
                },
            }
        }

        if conn.state == TcpState::Established {
            if let Some(server) = conn.server {
                debug!(
                    client = %client_ip, port = client_port, backend = %server.ipv4,
                    "forwarding segment"
                );
                frame.eth.dst = server.mac;
                frame.ip.dst = server.ipv4;
                frame.ip.ttl = OUTBOUND_TTL;
                return Some(frame);
            }
        }
        None
    }

    /// Handle a frame for a flow the table does not know about.
    fn open_flow(&self, mut frame: Frame) -> Option<Frame> {
        if !frame.tcp.flags.contains(TcpFlags::SYN) {
            // Out-of-state packet for an unknown flow. A conforming stack
            // would answer with RST; left as future work.
            debug!(
                client = %frame.ip.src, port = frame.tcp.src_port,
                "non-SYN packet for unknown flow, dropping"
            );
            return None;
        }

        info!(client = %frame.ip.src, port = frame.tcp.src_port, "new connection");
        let conn = self.table.insert(frame.ip.src, frame.tcp.src_port);
        let mut conn = conn.lock().unwrap();
        conn.state = TcpState::SynReceived;

        let syn_ack = TcpSegment {
            src_port: frame.tcp.dst_port,
            dst_port: frame.tcp.src_port,
            seq: conn.isn,
            ack: frame.tcp.seq.wrapping_add(1),
            flags: TcpFlags::SYN | TcpFlags::ACK,
            window: ADVERTISED_WINDOW,
            options: Vec::new(),
            payload: Vec::new(),
        };

        // Reply back along the path the SYN arrived on.
        std::mem::swap(&mut frame.eth.src, &mut frame.eth.dst);
        std::mem::swap(&mut frame.ip.src, &mut frame.ip.dst);
        frame.ip.ttl = OUTBOUND_TTL;
        frame.tcp = syn_ack;
        Some(frame)
    }
}

/// Stamp the balancer index into the TOS byte and serialize.
///
/// This is the single injection-stage chokepoint: every frame the
/// balancer emits passes through here, so the bridge can always identify
/// the originating balancer.
#[must_use]
pub fn finalize_outbound(mut frame: Frame, lb_index: u8) -> Vec<u8> {
    frame.ip.tos = lb_index;
    frame.to_bytes()
}
