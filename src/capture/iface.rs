//! Interface name to MAC / IPv4 resolution.

use crate::capture::error::{CaptureError, CaptureResult};
use crate::wire::MacAddr;
use nix::ifaddrs::getifaddrs;
use std::net::Ipv4Addr;

/// Link and network identity of a local interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    /// Interface name.
    pub name: String,

    /// Hardware address.
    pub mac: MacAddr,

    /// First IPv4 address.
    pub ipv4: Ipv4Addr,
}

/// Resolve an interface name to its MAC and first IPv4 address.
///
/// Both addresses are required: the MAC sources injected frames, the
/// IPv4 address anchors BPF filters and the raw socket. Missing either
/// is fatal at startup.
pub fn lookup(name: &str) -> CaptureResult<InterfaceInfo> {
    let mut found = false;
    let mut mac = None;
    let mut ipv4 = None;

    for ifaddr in getifaddrs()? {
        if ifaddr.interface_name != name {
            continue;
        }
        found = true;
        if let Some(address) = ifaddr.address {
            if let Some(link) = address.as_link_addr() {
                if let Some(octets) = link.addr() {
                    mac.get_or_insert(MacAddr(octets));
                }
            }
            if let Some(sin) = address.as_sockaddr_in() {
                ipv4.get_or_insert(sin.ip());
            }
        }
    }

    if !found {
        return Err(CaptureError::NoSuchInterface(name.to_string()));
    }
    let mac = mac.ok_or_else(|| CaptureError::NoAddress(name.to_string(), "link-layer"))?;
    let ipv4 = ipv4.ok_or_else(|| CaptureError::NoAddress(name.to_string(), "IPv4"))?;
    Ok(InterfaceInfo {
        name: name.to_string(),
        mac,
        ipv4,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_unknown_interface() {
        let err = lookup("l3dsr-does-not-exist").unwrap_err();
        assert!(matches!(err, CaptureError::NoSuchInterface(_)));
    }

    #[test]
    fn test_lookup_loopback_has_no_mac_or_succeeds() {
        // Loopback carries an all-zero MAC on Linux; accept either a
        // successful lookup or a missing-address error, but never a panic.
        match lookup("lo") {
            Ok(info) => assert_eq!(info.name, "lo"),
            Err(err) => assert!(matches!(err, CaptureError::NoAddress(..))),
        }
    }
}
