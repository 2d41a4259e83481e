//! # Balancer
//!
//! The client-facing half of the L3-DSR pair. Terminates the TCP
//! three-way handshake on behalf of an absent backend, pins a backend on
//! the first data segment, and forwards the client's frames with only the
//! destination MAC/IP rewritten, stamping the balancer index into the
//! IPv4 TOS byte at the injection stage so the packet bridge can tell
//! which balancer the flow came through.

mod config;
mod engine;
mod error;
mod pool;
mod table;

pub use config::{BackendConfig, BalancerConfig};
pub use engine::{finalize_outbound, BalancerEngine};
pub use error::{BalancerError, BalancerResult};
pub use pool::{Backend, BackendPool, RouteHint, SingleServerPool};
pub use table::{BalancerConn, StateTable};
