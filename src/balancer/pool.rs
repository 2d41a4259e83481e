//! Backend pool: picks a server for a new flow.

use crate::balancer::error::{BalancerError, BalancerResult};
use crate::wire::MacAddr;
use std::net::Ipv4Addr;
use std::sync::RwLock;

/// A backend server reachable on the balancer's L2 segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backend {
    /// Backend IPv4 address.
    pub ipv4: Ipv4Addr,

    /// Backend MAC address, used for the L2 rewrite.
    pub mac: MacAddr,
}

/// Routing hint extracted from the first data segment.
///
/// Currently the request URI of an HTTP request line, when one can be
/// read from the payload. Pools may hash it for sticky routing; the
/// default pool ignores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteHint(String);

impl RouteHint {
    /// Fallback hint used when the payload yields nothing useful.
    pub const STUB: &'static str = "/";

    /// Extract a hint from a segment payload.
    ///
    /// Reads the URI out of an HTTP request line (`METHOD SP URI SP
    /// VERSION`). Anything unparseable falls back to [`RouteHint::STUB`];
    /// requests split across segments are not reassembled.
    #[must_use]
    pub fn from_payload(payload: &[u8]) -> Self {
        let uri = std::str::from_utf8(payload)
            .ok()
            .and_then(|text| text.lines().next())
            .and_then(|line| {
                let mut words = line.split(' ');
                let _method = words.next()?;
                let uri = words.next()?;
                let version = words.next()?;
                version.starts_with("HTTP/").then(|| uri.to_string())
            });
        Self(uri.unwrap_or_else(|| Self::STUB.to_string()))
    }

    /// The hint value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A pool that can route a new flow to a backend.
pub trait BackendPool: Send + Sync {
    /// Register a server with the pool.
    fn add_server(&self, server: Backend);

    /// Pick a backend for a flow. `hint` allows content-aware policies
    /// such as consistent hashing on the request URI.
    fn route(&self, hint: &RouteHint) -> BalancerResult<Backend>;
}

/// The default pool: a single server, hint ignored.
#[derive(Debug, Default)]
pub struct SingleServerPool {
    server: RwLock<Option<Backend>>,
}

impl SingleServerPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pool already holding `server`.
    #[must_use]
    pub fn with_server(server: Backend) -> Self {
        Self {
            server: RwLock::new(Some(server)),
        }
    }
}

impl BackendPool for SingleServerPool {
    fn add_server(&self, server: Backend) {
        *self.server.write().unwrap() = Some(server);
    }

    fn route(&self, hint: &RouteHint) -> BalancerResult<Backend> {
        self.server
            .read()
            .unwrap()
            .ok_or_else(|| BalancerError::NoBackend(hint.as_str().to_string()))
    }
}
