//! Shared TCP flow definitions used by both daemons.

use std::fmt;
use std::net::Ipv4Addr;

/// Window advertised on every locally generated segment. No window
/// management is performed beyond this fixed value.
pub const ADVERTISED_WINDOW: u16 = 64240;

/// TTL written on every emitted frame.
pub const OUTBOUND_TTL: u8 = 64;

/// TCP connection state.
///
/// The full RFC 793 set is listed; the engines only ever move flows
/// through `SynSent`, `SynReceived`, and `Established`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TcpState {
    /// No handshake observed yet.
    #[default]
    Closed,
    /// SYN sent toward the backend, awaiting SYN-ACK.
    SynSent,
    /// Client SYN answered with SYN-ACK, awaiting the final ACK.
    SynReceived,
    /// Handshake complete.
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

impl fmt::Display for TcpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TcpState::Closed => "CLOSED",
            TcpState::SynSent => "SYN_SENT",
            TcpState::SynReceived => "SYN_RECEIVED",
            TcpState::Established => "ESTABLISHED",
            TcpState::FinWait1 => "FIN_WAIT_1",
            TcpState::FinWait2 => "FIN_WAIT_2",
            TcpState::CloseWait => "CLOSE_WAIT",
            TcpState::Closing => "CLOSING",
            TcpState::LastAck => "LAST_ACK",
            TcpState::TimeWait => "TIME_WAIT",
        };
        f.write_str(name)
    }
}

/// Key identifying a client-side flow: the client's address and port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    /// Client IPv4 address.
    pub ip: Ipv4Addr,

    /// Client TCP port.
    pub port: u16,
}

impl FlowKey {
    /// Build a key from a client endpoint.
    #[must_use]
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(TcpState::SynReceived.to_string(), "SYN_RECEIVED");
        assert_eq!(TcpState::Established.to_string(), "ESTABLISHED");
    }

    #[test]
    fn test_flow_key_equality() {
        let a = FlowKey::new(Ipv4Addr::new(10, 0, 0, 1), 40000);
        let b = FlowKey::new(Ipv4Addr::new(10, 0, 0, 1), 40000);
        let c = FlowKey::new(Ipv4Addr::new(10, 0, 0, 1), 40001);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "10.0.0.1:40000");
    }
}
