//! # Transport adapters
//!
//! The process's only contact with the wire: libpcap capture/injection
//! on the client-facing segment (immediate mode, BPF-filtered) and a raw
//! IPv4:TCP socket for the backend path, plus interface identity lookup.
//! Everything above this module works on decoded frames and segments.

mod error;
pub mod iface;
mod l2;
mod raw;

pub use error::{CaptureError, CaptureResult};
pub use iface::InterfaceInfo;
pub use l2::{bpf_expr, L2Capture, L2Injector};
pub use raw::{strip_ipv4_header, RawTcpSocket, MAX_DATAGRAM};
