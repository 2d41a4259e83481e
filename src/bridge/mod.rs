//! # Packet bridge
//!
//! The backend-side half of the L3-DSR pair. Receives tagged frames that
//! still carry the client's L3/L4 identity and sequence space, opens its
//! own TCP session to the co-located backend from a random ephemeral
//! port, and keeps the two sessions joined with a single wrapping
//! sequence offset. Backend replies are rewritten into the client's
//! sequence space and injected as L2 frames addressed straight to the
//! client, sourced from the balancer the flow originally traversed.

mod config;
mod engine;
mod error;
mod table;

pub use config::{BalancerRegistry, BridgeConfig};
pub use engine::{BridgeEngine, BridgeReply};
pub use error::{BridgeError, BridgeResult};
pub use table::{BridgeConn, BridgeTable};
