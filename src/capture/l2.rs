//! L2 capture and injection over libpcap.

use crate::capture::error::CaptureResult;
use pcap::{Active, Capture};
use std::net::Ipv4Addr;

/// Build the client-facing capture filter: only TCP traffic to the local
/// endpoint is of interest.
#[must_use]
pub fn bpf_expr(port: u16, host: Ipv4Addr) -> String {
    format!("tcp and dst port {port} and dst host {host}")
}

fn open(interface: &str) -> CaptureResult<Capture<Active>> {
    // Immediate mode: packets are delivered as they arrive instead of
    // waiting for the kernel buffer to fill.
    let capture = Capture::from_device(interface)?
        .immediate_mode(true)
        .open()?;
    Ok(capture)
}

/// Capture side of an interface, restricted by a BPF expression.
pub struct L2Capture {
    capture: Capture<Active>,
}

impl L2Capture {
    /// Open `interface` for capture with `filter` applied.
    pub fn open(interface: &str, filter: &str) -> CaptureResult<Self> {
        let mut capture = open(interface)?;
        capture.filter(filter, true)?;
        Ok(Self { capture })
    }

    /// Block until the next frame arrives.
    pub fn next_frame(&mut self) -> CaptureResult<Vec<u8>> {
        let packet = self.capture.next_packet()?;
        Ok(packet.data.to_vec())
    }
}

/// Injection side of an interface.
pub struct L2Injector {
    capture: Capture<Active>,
}

impl L2Injector {
    /// Open `interface` for raw frame injection.
    pub fn open(interface: &str) -> CaptureResult<Self> {
        Ok(Self {
            capture: open(interface)?,
        })
    }

    /// Write one raw frame to the wire.
    pub fn inject(&mut self, frame: &[u8]) -> CaptureResult<()> {
        self.capture.sendpacket(frame)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bpf_expr() {
        assert_eq!(
            bpf_expr(80, Ipv4Addr::new(192, 168, 34, 20)),
            "tcp and dst port 80 and dst host 192.168.34.20"
        );
    }
}
