//! Raw IPv4:TCP socket adapter for the backend path.

use crate::capture::error::{CaptureError, CaptureResult};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::Read;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Maximum datagram the adapter will read.
pub const MAX_DATAGRAM: usize = 1500;

/// Locate the TCP payload of a received raw datagram.
///
/// The kernel hands raw IPv4 sockets the full packet including the IP
/// header; this returns the source address and the offset of the TCP
/// segment past the header and any options.
pub fn strip_ipv4_header(datagram: &[u8]) -> CaptureResult<(Ipv4Addr, usize)> {
    if datagram.len() < 20 {
        return Err(CaptureError::MalformedDatagram(datagram.len()));
    }
    let header_len = usize::from(datagram[0] & 0x0F) * 4;
    if (datagram[0] >> 4) != 4 || header_len < 20 || datagram.len() < header_len {
        return Err(CaptureError::MalformedDatagram(datagram.len()));
    }
    let src = Ipv4Addr::new(datagram[12], datagram[13], datagram[14], datagram[15]);
    Ok((src, header_len))
}

/// A raw IPv4 socket at protocol TCP, bound to one local address.
///
/// Writes carry a bare TCP segment; the kernel builds the IPv4 header.
/// Reads are normalized through [`strip_ipv4_header`].
pub struct RawTcpSocket {
    socket: Socket,
}

impl RawTcpSocket {
    /// Open a raw socket bound to `local`.
    pub fn bind(local: Ipv4Addr) -> CaptureResult<Self> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::TCP))?;
        socket.bind(&SockAddr::from(SocketAddrV4::new(local, 0)))?;
        Ok(Self { socket })
    }

    /// Block until a datagram arrives; returns its source address and the
    /// TCP segment bytes.
    pub fn recv_segment<'a>(&self, buf: &'a mut [u8]) -> CaptureResult<(Ipv4Addr, &'a [u8])> {
        let n = (&self.socket).read(buf)?;
        let (src, offset) = strip_ipv4_header(&buf[..n])?;
        Ok((src, &buf[offset..n]))
    }

    /// Send a serialized TCP segment to `dst`.
    pub fn send_segment(&self, segment: &[u8], dst: Ipv4Addr) -> CaptureResult<()> {
        let addr = SockAddr::from(SocketAddrV4::new(dst, 0));
        self.socket.send_to(segment, &addr)?;
        Ok(())
    }
}
