//! # Frame codec
//!
//! Typed decoding and encoding of the Ethernet/IPv4/TCP frames both
//! daemons work on. A captured frame parses into an explicit [`Frame`]
//! record; serialization recomputes length fields, the IPv4 header
//! checksum, and the TCP checksum over the IPv4 pseudo-header.

pub mod checksum;
mod error;
mod ethernet;
pub mod ipv4;
mod tcp;

pub use error::{ParseError, ParseResult};
pub use ethernet::{EthernetHeader, MacAddr, ETHERTYPE_IPV4, ETH_HEADER_LEN};
pub use ipv4::{Ipv4Header, IPV4_HEADER_LEN, PROTOCOL_TCP};
pub use tcp::{TcpFlags, TcpSegment, TCP_HEADER_LEN};

/// A fully decoded Ethernet/IPv4/TCP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Link layer.
    pub eth: EthernetHeader,

    /// Network layer.
    pub ip: Ipv4Header,

    /// Transport layer, including options and payload.
    pub tcp: TcpSegment,
}

impl Frame {
    /// Decode a captured frame, rejecting anything that is not
    /// Ethernet/IPv4/TCP.
    pub fn parse(data: &[u8]) -> ParseResult<Self> {
        let eth = EthernetHeader::parse(data)?;
        if eth.ethertype != ETHERTYPE_IPV4 {
            return Err(ParseError::NotIpv4(eth.ethertype));
        }
        let ip_data = &data[ETH_HEADER_LEN..];
        let (ip, ip_header_len) = Ipv4Header::parse(ip_data)?;
        if ip.protocol != PROTOCOL_TCP {
            return Err(ParseError::NotTcp(ip.protocol));
        }
        let tcp = TcpSegment::parse(&ip_data[ip_header_len..])?;
        Ok(Self { eth, ip, tcp })
    }

    /// Serialize the frame with valid lengths and checksums.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let tcp_len = self.tcp.wire_len();
        let mut bytes = Vec::with_capacity(ETH_HEADER_LEN + IPV4_HEADER_LEN + tcp_len);
        self.eth.put(&mut bytes);
        self.ip.put(&mut bytes, tcp_len);
        self.tcp.put(&mut bytes, self.ip.src, self.ip.dst);
        bytes
    }
}
