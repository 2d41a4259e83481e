//! Error types for the transport adapters.

use thiserror::Error;

/// Result type for capture and socket operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Errors from the L2 and raw-socket adapters.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// libpcap failure (open, filter, read, or inject).
    #[error("pcap: {0}")]
    Pcap(#[from] pcap::Error),

    /// Raw socket I/O failure.
    #[error("raw socket: {0}")]
    Io(#[from] std::io::Error),

    /// Interface enumeration failure.
    #[error("interface lookup: {0}")]
    Ifaddrs(#[from] nix::Error),

    /// The named interface does not exist.
    #[error("no such interface: {0}")]
    NoSuchInterface(String),

    /// The interface exists but has no usable address.
    #[error("interface {0} has no {1} address")]
    NoAddress(String, &'static str),

    /// A received datagram was too short to carry an IPv4 header.
    #[error("malformed IPv4 datagram ({0} bytes)")]
    MalformedDatagram(usize),
}
