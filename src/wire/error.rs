//! Error types for the frame codec.

use thiserror::Error;

/// Result type for codec operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Errors raised while decoding a captured frame or datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Frame too short to hold an Ethernet header.
    #[error("truncated Ethernet header: {0} bytes")]
    TruncatedEthernet(usize),

    /// EtherType is not IPv4.
    #[error("not an IPv4 frame (ethertype {0:#06x})")]
    NotIpv4(u16),

    /// Packet too short or malformed at the IPv4 layer.
    #[error("truncated or malformed IPv4 header: {0} bytes")]
    TruncatedIpv4(usize),

    /// IP version field is not 4.
    #[error("unsupported IP version {0}")]
    BadIpVersion(u8),

    /// IPv4 payload is not TCP.
    #[error("not a TCP packet (protocol {0})")]
    NotTcp(u8),

    /// Segment too short or malformed at the TCP layer.
    #[error("truncated or malformed TCP header: {0} bytes")]
    TruncatedTcp(usize),
}
