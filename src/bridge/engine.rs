//! TCP splicing engine.
//!
//! Two halves drive one shared table. The client half consumes tagged
//! frames captured on the frontend interface and produces segments for
//! the backend socket. The backend half consumes raw datagrams from the
//! backend and produces either further backend segments (handshake ACK,
//! RST for unknown flows) or L2 frames injected straight back to the
//! client with the originating balancer's address as the source.

use crate::bridge::config::BalancerRegistry;
use crate::bridge::table::BridgeTable;
use crate::flow::{TcpState, ADVERTISED_WINDOW, OUTBOUND_TTL};
use crate::wire::{
    EthernetHeader, Frame, Ipv4Header, MacAddr, TcpFlags, TcpSegment, ETHERTYPE_IPV4, PROTOCOL_TCP,
};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Output of the backend half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeReply {
    /// A segment for the backend socket.
    ToBackend(TcpSegment),

    /// A frame to inject on the frontend interface toward the client.
    ToClient(Frame),
}

/// The splicing state machine.
///
/// Both halves are pure with respect to I/O: they consume decoded input
/// and return what to emit. The caller owns capture, the raw socket, and
/// injection.
pub struct BridgeEngine {
    table: Arc<BridgeTable>,
    balancers: BalancerRegistry,

    /// MAC of the frontend interface, the L2 source on the return path.
    iface_mac: MacAddr,

    /// Expected backend endpoint; datagrams from anywhere else drop.
    backend_ip: Ipv4Addr,
    backend_port: u16,

    /// IPv4 Id for return-path frames: monotonic from a random start.
    ip_id: AtomicU16,
}

impl BridgeEngine {
    /// Create an engine for one backend endpoint.
    pub fn new(
        table: Arc<BridgeTable>,
        balancers: BalancerRegistry,
        iface_mac: MacAddr,
        backend_ip: Ipv4Addr,
        backend_port: u16,
    ) -> Self {
        Self {
            table,
            balancers,
            iface_mac,
            backend_ip,
            backend_port,
            ip_id: AtomicU16::new(SmallRng::from_entropy().gen()),
        }
    }

    /// Client half: run one tagged frame through the state machine,
    /// returning the segment to send to the backend, if any.
    pub fn process_client(&self, frame: Frame) -> Option<TcpSegment> {
        let client_ip = frame.ip.src;
        let client_port = frame.tcp.src_port;

        if let Some(conn) = self.table.get_by_client(client_ip, client_port) {
            let conn = conn.lock().unwrap();
            if conn.state != TcpState::Established {
                debug!(
                    client = %client_ip, port = client_port, state = %conn.state,
                    "segment for unestablished splice, dropping"
                );
                return None;
            }
            // Shift the acknowledgement into the backend's sequence space
            // and take over the source port.
            let mut segment = frame.tcp;
            segment.ack = segment.ack.wrapping_add(conn.seq_offset);
            segment.src_port = conn.ephemeral_port;
            return Some(segment);
        }

        // New flow: record it and open our own handshake with the backend.
        let conn = match self.table.insert(
            client_ip,
            frame.eth.src,
            client_port,
            frame.ip.tos,
            frame.tcp.ack,
            frame.tcp.payload,
        ) {
            Ok(conn) => conn,
            Err(e) => {
                warn!(client = %client_ip, port = client_port, error = %e, "cannot track flow");
                return None;
            },
        };
        let mut conn = conn.lock().unwrap();
        conn.state = TcpState::SynSent;
        info!(
            client = %client_ip, port = client_port, ephemeral = conn.ephemeral_port,
            lb_index = conn.lb_index, "new flow, opening backend handshake"
        );

        Some(TcpSegment {
            src_port: conn.ephemeral_port,
            dst_port: frame.tcp.dst_port,
            // The backend's handshake consumes one sequence number, which
            // lands the session exactly on the client's sequence space.
            seq: frame.tcp.seq.wrapping_sub(1),
            ack: 0,
            flags: TcpFlags::SYN,
            window: ADVERTISED_WINDOW,
            options: Vec::new(),
            payload: Vec::new(),
        })
    }

    /// Backend half: run one raw datagram through the state machine.
    ///
    /// `src` is the datagram's source address as reported by the raw
    /// socket; anything not from the expected backend endpoint is
    /// silently dropped.
    pub fn process_backend(&self, src: Ipv4Addr, segment: TcpSegment) -> Vec<BridgeReply> {
        if src != self.backend_ip || segment.src_port != self.backend_port {
            return Vec::new();
        }

        let conn = match self.table.get_by_port(segment.dst_port) {
            Some(conn) => conn,
            None => {
                info!(
                    port = segment.dst_port,
                    "backend packet for unknown flow, answering RST"
                );
                return vec![BridgeReply::ToBackend(TcpSegment {
                    src_port: segment.dst_port,
                    dst_port: segment.src_port,
                    seq: segment.ack,
                    ack: segment.seq.wrapping_add(1),
                    flags: TcpFlags::RST | TcpFlags::ACK,
                    window: ADVERTISED_WINDOW,
                    options: Vec::new(),
                    payload: Vec::new(),
                })];
            },
        };
        let mut conn = conn.lock().unwrap();

        if conn.state == TcpState::SynSent
            && segment.flags.contains(TcpFlags::SYN | TcpFlags::ACK)
        {
            conn.state = TcpState::Established;
            // The splice constant: from here on, subtracting it from a
            // backend sequence yields the client-expected sequence, and
            // the client half adds it to acknowledgements.
            conn.seq_offset = segment
                .seq
                .wrapping_sub(conn.seq_offset)
                .wrapping_add(1);
            info!(
                client = %conn.client_ip, port = conn.client_port,
                ephemeral = conn.ephemeral_port, "backend handshake complete"
            );

            let ack = TcpSegment {
                src_port: segment.dst_port,
                dst_port: segment.src_port,
                seq: segment.ack,
                ack: segment.seq.wrapping_add(1),
                flags: TcpFlags::ACK,
                window: ADVERTISED_WINDOW,
                options: Vec::new(),
                payload: Vec::new(),
            };
            let mut replies = vec![BridgeReply::ToBackend(ack)];

            // Replay the buffered first request instead of waiting for the
            // client to retransmit it.
            let payload = std::mem::take(&mut conn.payload_buf);
            if !payload.is_empty() {
                replies.push(BridgeReply::ToBackend(TcpSegment {
                    src_port: segment.dst_port,
                    dst_port: segment.src_port,
                    seq: segment.ack,
                    ack: segment.seq.wrapping_add(1),
                    flags: TcpFlags::ACK | TcpFlags::PSH,
                    window: ADVERTISED_WINDOW,
                    options: Vec::new(),
                    payload,
                }));
            }
            return replies;
        }

        // Established flow: translate into the client's sequence space and
        // hand the segment straight back to the client, sourced from the
        // balancer it arrived through.
        let balancer_ip = match self.balancers.get(conn.lb_index) {
            Some(ip) => ip,
            None => {
                warn!(
                    lb_index = conn.lb_index, client = %conn.client_ip,
                    "no balancer registered for index, dropping"
                );
                return Vec::new();
            },
        };

        let mut out = segment;
        out.seq = out.seq.wrapping_sub(conn.seq_offset);
        out.dst_port = conn.client_port;

        debug!(
            client = %conn.client_ip, port = conn.client_port, src = %balancer_ip,
            "splicing backend segment to client"
        );
        vec![BridgeReply::ToClient(Frame {
            eth: EthernetHeader {
                dst: conn.client_mac,
                src: self.iface_mac,
                ethertype: ETHERTYPE_IPV4,
            },
            ip: Ipv4Header {
                tos: 0,
                id: self.ip_id.fetch_add(1, Ordering::Relaxed),
                dont_fragment: true,
                ttl: OUTBOUND_TTL,
                protocol: PROTOCOL_TCP,
                src: balancer_ip,
                dst: conn.client_ip,
            },
            tcp: out,
        })]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const BRIDGE_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 34, 20);
    const BACKEND_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 34, 10);
    const BALANCER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 34, 30);
    const CLIENT_ISN_ACK: u32 = 77_001; // client's expected server seq (balancer ISN + 1)
    const BACKEND_ISN: u32 = 5000;

    fn client_mac() -> MacAddr {
        "aa:aa:aa:aa:aa:aa".parse().unwrap()
    }

    fn bridge_mac() -> MacAddr {
        "cc:cc:cc:cc:cc:cc".parse().unwrap()
    }

    fn engine() -> (BridgeEngine, Arc<BridgeTable>) {
        let table = Arc::new(BridgeTable::new());
        let engine = BridgeEngine::new(
            Arc::clone(&table),
            "7:192.168.34.30".parse().unwrap(),
            bridge_mac(),
            BACKEND_IP,
            80,
        );
        (engine, table)
    }

    /// A tagged frame as the balancer emits it: client identity intact,
    /// TOS carrying the balancer index.
    fn tagged_frame(tcp: TcpSegment) -> Frame {
        Frame {
            eth: EthernetHeader {
                dst: bridge_mac(),
                src: client_mac(),
                ethertype: ETHERTYPE_IPV4,
            },
            ip: Ipv4Header {
                tos: 7,
                id: 100,
                dont_fragment: false,
                ttl: 64,
                protocol: PROTOCOL_TCP,
                src: CLIENT_IP,
                dst: BRIDGE_IP,
            },
            tcp,
        }
    }

    fn first_data() -> Frame {
        tagged_frame(TcpSegment {
            src_port: 40000,
            dst_port: 80,
            seq: 1001,
            ack: CLIENT_ISN_ACK,
            flags: TcpFlags::ACK | TcpFlags::PSH,
            window: 64240,
            payload: b"GET / HTTP/1.1\r\n\r\n".to_vec(),
            ..TcpSegment::default()
        })
    }

    fn syn_ack(ephemeral: u16) -> TcpSegment {
        TcpSegment {
            src_port: 80,
            dst_port: ephemeral,
            seq: BACKEND_ISN,
            ack: 1001,
            flags: TcpFlags::SYN | TcpFlags::ACK,
            window: 64240,
            ..TcpSegment::default()
        }
    }

    /// Drive a flow to ESTABLISHED, returning the ephemeral port.
    fn establish(engine: &BridgeEngine, table: &BridgeTable) -> u16 {
        engine.process_client(first_data()).unwrap();
        let ephemeral = table
            .get_by_client(CLIENT_IP, 40000)
            .unwrap()
            .lock()
            .unwrap()
            .ephemeral_port;
        engine.process_backend(BACKEND_IP, syn_ack(ephemeral));
        ephemeral
    }

    #[test]
    fn test_first_tagged_frame_opens_backend_handshake() {
        let (engine, table) = engine();
        let syn = engine.process_client(first_data()).unwrap();

        let conn = table.get_by_client(CLIENT_IP, 40000).unwrap();
        let conn = conn.lock().unwrap();
        assert_eq!(conn.state, TcpState::SynSent);
        assert_eq!(conn.seq_offset, CLIENT_ISN_ACK);
        assert_eq!(conn.lb_index, 7);
        assert_eq!(conn.client_port, 40000);
        assert_eq!(conn.client_mac, client_mac());
        assert_eq!(conn.payload_buf, b"GET / HTTP/1.1\r\n\r\n");

        assert_eq!(syn.src_port, conn.ephemeral_port);
        assert_eq!(syn.dst_port, 80);
        assert_eq!(syn.seq, 1000);
        assert_eq!(syn.ack, 0);
        assert_eq!(syn.flags, TcpFlags::SYN);
        assert!(syn.payload.is_empty());
    }

    #[test]
    fn test_syn_ack_establishes_and_fixes_offset() {
        let (engine, table) = engine();
        engine.process_client(first_data()).unwrap();
        let ephemeral = table
            .get_by_client(CLIENT_IP, 40000)
            .unwrap()
            .lock()
            .unwrap()
            .ephemeral_port;

        let replies = engine.process_backend(BACKEND_IP, syn_ack(ephemeral));

        let conn = table.get_by_port(ephemeral).unwrap();
        let conn = conn.lock().unwrap();
        assert_eq!(conn.state, TcpState::Established);
        assert_eq!(
            conn.seq_offset,
            BACKEND_ISN.wrapping_sub(CLIENT_ISN_ACK).wrapping_add(1)
        );

        // Pure ACK first, then the replayed first request.
        assert_eq!(replies.len(), 2);
        match &replies[0] {
            BridgeReply::ToBackend(ack) => {
                assert_eq!(ack.seq, 1001);
                assert_eq!(ack.ack, BACKEND_ISN + 1);
                assert_eq!(ack.flags, TcpFlags::ACK);
                assert!(ack.payload.is_empty());
            },
            other => panic!("expected backend ACK, got {other:?}"),
        }
        match &replies[1] {
            BridgeReply::ToBackend(data) => {
                assert_eq!(data.seq, 1001);
                assert_eq!(data.flags, TcpFlags::ACK | TcpFlags::PSH);
                assert_eq!(data.payload, b"GET / HTTP/1.1\r\n\r\n");
            },
            other => panic!("expected replayed payload, got {other:?}"),
        }
        assert!(conn.payload_buf.is_empty());
    }

    #[test]
    fn test_established_client_segment_is_translated() {
        let (engine, table) = engine();
        let ephemeral = establish(&engine, &table);
        let offset = BACKEND_ISN.wrapping_sub(CLIENT_ISN_ACK).wrapping_add(1);

        let ack = tagged_frame(TcpSegment {
            src_port: 40000,
            dst_port: 80,
            seq: 1019,
            ack: CLIENT_ISN_ACK.wrapping_add(2),
            flags: TcpFlags::ACK,
            window: 64240,
            ..TcpSegment::default()
        });
        let out = engine.process_client(ack).unwrap();
        assert_eq!(out.src_port, ephemeral);
        assert_eq!(out.ack, CLIENT_ISN_ACK.wrapping_add(2).wrapping_add(offset));
        assert_eq!(out.seq, 1019);
    }

    #[test]
    fn test_backend_data_splices_to_client() {
        let (engine, table) = engine();
        let ephemeral = establish(&engine, &table);
        let offset = BACKEND_ISN.wrapping_sub(CLIENT_ISN_ACK).wrapping_add(1);

        let data = TcpSegment {
            src_port: 80,
            dst_port: ephemeral,
            seq: BACKEND_ISN + 1,
            ack: 1019,
            flags: TcpFlags::ACK | TcpFlags::PSH,
            window: 64240,
            payload: b"HTTP/1.1 200 OK\r\n\r\n".to_vec(),
            ..TcpSegment::default()
        };
        let replies = engine.process_backend(BACKEND_IP, data.clone());
        assert_eq!(replies.len(), 1);
        let frame = match &replies[0] {
            BridgeReply::ToClient(frame) => frame,
            other => panic!("expected frame to client, got {other:?}"),
        };

        assert_eq!(frame.eth.src, bridge_mac());
        assert_eq!(frame.eth.dst, client_mac());
        assert_eq!(frame.ip.src, BALANCER_IP);
        assert_eq!(frame.ip.dst, CLIENT_IP);
        assert_eq!(frame.ip.ttl, 64);
        assert!(frame.ip.dont_fragment);

        assert_eq!(frame.tcp.src_port, 80);
        assert_eq!(frame.tcp.dst_port, 40000);
        // The translated sequence lands exactly where the client expects:
        // shifting it back by the offset recovers the backend sequence.
        assert_eq!(frame.tcp.seq, CLIENT_ISN_ACK);
        assert_eq!(frame.tcp.seq.wrapping_add(offset), data.seq);
        assert_eq!(frame.tcp.ack, 1019);
        assert_eq!(frame.tcp.payload, b"HTTP/1.1 200 OK\r\n\r\n");
    }

    #[test]
    fn test_unknown_backend_flow_answers_rst_ack() {
        let (engine, _table) = engine();
        let stray = TcpSegment {
            src_port: 80,
            dst_port: 9999,
            seq: 400,
            ack: 300,
            flags: TcpFlags::ACK,
            ..TcpSegment::default()
        };
        let replies = engine.process_backend(BACKEND_IP, stray);
        assert_eq!(replies.len(), 1);
        match &replies[0] {
            BridgeReply::ToBackend(rst) => {
                assert_eq!(rst.flags, TcpFlags::RST | TcpFlags::ACK);
                assert_eq!(rst.seq, 300);
                assert_eq!(rst.ack, 401);
                assert_eq!(rst.src_port, 9999);
                assert_eq!(rst.dst_port, 80);
            },
            other => panic!("expected RST to backend, got {other:?}"),
        }
    }

    #[test]
    fn test_unexpected_source_is_dropped() {
        let (engine, table) = engine();
        let ephemeral = establish(&engine, &table);

        let from_elsewhere = TcpSegment {
            src_port: 80,
            dst_port: ephemeral,
            seq: BACKEND_ISN + 1,
            flags: TcpFlags::ACK,
            ..TcpSegment::default()
        };
        assert!(engine
            .process_backend(Ipv4Addr::new(1, 2, 3, 4), from_elsewhere.clone())
            .is_empty());

        let wrong_port = TcpSegment {
            src_port: 8080,
            ..from_elsewhere
        };
        assert!(engine.process_backend(BACKEND_IP, wrong_port).is_empty());
    }

    #[test]
    fn test_unestablished_client_segment_is_dropped() {
        let (engine, _table) = engine();
        engine.process_client(first_data()).unwrap();
        // Splice not yet established; a retransmission must not emit.
        assert!(engine.process_client(first_data().clone()).is_none());
    }

    #[test]
    fn test_sequence_translation_wraps() {
        let table = Arc::new(BridgeTable::new());
        let engine = BridgeEngine::new(
            Arc::clone(&table),
            "7:192.168.34.30".parse().unwrap(),
            bridge_mac(),
            BACKEND_IP,
            80,
        );

        // Client expects server sequences just below the wrap point.
        let client_ack = u32::MAX - 2;
        let frame = tagged_frame(TcpSegment {
            src_port: 40000,
            dst_port: 80,
            seq: 1001,
            ack: client_ack,
            flags: TcpFlags::ACK | TcpFlags::PSH,
            payload: b"x".to_vec(),
            ..TcpSegment::default()
        });
        engine.process_client(frame).unwrap();
        let ephemeral = table
            .get_by_client(CLIENT_IP, 40000)
            .unwrap()
            .lock()
            .unwrap()
            .ephemeral_port;
        engine.process_backend(
            BACKEND_IP,
            TcpSegment {
                src_port: 80,
                dst_port: ephemeral,
                seq: 100,
                ack: 1001,
                flags: TcpFlags::SYN | TcpFlags::ACK,
                ..TcpSegment::default()
            },
        );

        // Backend data at seq 101 must come out at client_ack, wrapping
        // through the 2^32 boundary.
        let replies = engine.process_backend(
            BACKEND_IP,
            TcpSegment {
                src_port: 80,
                dst_port: ephemeral,
                seq: 101,
                ack: 1002,
                flags: TcpFlags::ACK,
                payload: b"ok".to_vec(),
                ..TcpSegment::default()
            },
        );
        match &replies[0] {
            BridgeReply::ToClient(frame) => assert_eq!(frame.tcp.seq, client_ack),
            other => panic!("expected frame to client, got {other:?}"),
        }
    }
}
