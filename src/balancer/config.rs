//! Configuration for the balancer daemon.

use crate::balancer::error::{BalancerError, BalancerResult};
use crate::wire::MacAddr;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;

/// Balancer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerConfig {
    /// Client-facing interface to capture and inject on.
    #[serde(default = "default_interface")]
    pub interface: String,

    /// TCP port to intercept.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Balancer index stamped into the IPv4 TOS byte of every emitted
    /// frame. Identifies this balancer to the packet bridge.
    #[serde(default = "default_lb_index")]
    pub lb_index: u8,

    /// The single backend server.
    pub backend: BackendConfig,
}

/// Backend endpoint the balancer forwards to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend IPv4 address.
    pub ip: Ipv4Addr,

    /// Backend MAC address.
    pub mac: MacAddr,
}

fn default_interface() -> String {
    "eth1".to_string()
}

fn default_port() -> u16 {
    80
}

fn default_lb_index() -> u8 {
    1
}

impl BalancerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> BalancerResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| BalancerError::InvalidConfig(format!("read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| BalancerError::InvalidConfig(format!("parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> BalancerResult<()> {
        if self.interface.is_empty() {
            return Err(BalancerError::InvalidConfig(
                "interface must not be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(BalancerError::InvalidConfig(
                "port must be non-zero".to_string(),
            ));
        }
        if self.lb_index == 0 {
            return Err(BalancerError::InvalidConfig(
                "lb-index must be in 1..=255".to_string(),
            ));
        }
        Ok(())
    }
}
