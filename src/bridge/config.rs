//! Configuration for the packet-bridge daemon.

use crate::bridge::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;

/// Registry of balancers, keyed by the index each one stamps into the
/// TOS byte. The bridge uses it to pick the source IP for return-path
/// frames.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "HashMap<String, Ipv4Addr>", into = "HashMap<String, Ipv4Addr>")]
pub struct BalancerRegistry {
    balancers: HashMap<u8, Ipv4Addr>,
}

impl BalancerRegistry {
    /// Look up a balancer's IPv4 by index.
    pub fn get(&self, index: u8) -> Option<Ipv4Addr> {
        self.balancers.get(&index).copied()
    }

    /// Number of registered balancers.
    pub fn len(&self) -> usize {
        self.balancers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.balancers.is_empty()
    }
}

impl FromStr for BalancerRegistry {
    type Err = BridgeError;

    /// Parse the `INDEX:IP[,INDEX:IP…]` flag format, e.g.
    /// `1:192.168.34.30,2:192.168.34.31`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut balancers = HashMap::new();
        for entry in s.split(',') {
            let (index, ip) = entry.split_once(':').ok_or_else(|| {
                BridgeError::InvalidConfig(format!(
                    "balancer entry '{entry}' is not in INDEX:IP form"
                ))
            })?;
            let index: u8 = index.trim().parse().map_err(|_| {
                BridgeError::InvalidConfig(format!("balancer index '{index}' is not in 0..=255"))
            })?;
            let ip: Ipv4Addr = ip.trim().parse().map_err(|_| {
                BridgeError::InvalidConfig(format!("'{ip}' is not an IPv4 address"))
            })?;
            balancers.insert(index, ip);
        }
        Ok(Self { balancers })
    }
}

impl TryFrom<HashMap<String, Ipv4Addr>> for BalancerRegistry {
    type Error = BridgeError;

    fn try_from(map: HashMap<String, Ipv4Addr>) -> Result<Self, Self::Error> {
        let mut balancers = HashMap::new();
        for (index, ip) in map {
            let index: u8 = index.parse().map_err(|_| {
                BridgeError::InvalidConfig(format!("balancer index '{index}' is not in 0..=255"))
            })?;
            balancers.insert(index, ip);
        }
        Ok(Self { balancers })
    }
}

impl From<BalancerRegistry> for HashMap<String, Ipv4Addr> {
    fn from(registry: BalancerRegistry) -> Self {
        registry
            .balancers
            .into_iter()
            .map(|(index, ip)| (index.to_string(), ip))
            .collect()
    }
}

/// Packet-bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Client-facing interface: tagged frames arrive here and
    /// return-path frames leave here.
    #[serde(default = "default_frontend")]
    pub frontend: String,

    /// Backend-facing interface. Its IPv4 address is the backend
    /// endpoint (the backend is co-located behind this interface).
    #[serde(default = "default_backend")]
    pub backend: String,

    /// TCP port to splice.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Known balancers by TOS index.
    pub balancers: BalancerRegistry,
}

fn default_frontend() -> String {
    "eth1".to_string()
}

fn default_backend() -> String {
    "eth2".to_string()
}

fn default_port() -> u16 {
    80
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> BridgeResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| BridgeError::InvalidConfig(format!("read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| BridgeError::InvalidConfig(format!("parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.frontend.is_empty() || self.backend.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "interface names must not be empty".to_string(),
            ));
        }
        if self.frontend == self.backend {
            return Err(BridgeError::InvalidConfig(
                "frontend and backend interfaces must differ".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(BridgeError::InvalidConfig(
                "port must be non-zero".to_string(),
            ));
        }
        if self.balancers.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "at least one balancer must be registered".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_from_flag_format() {
        let registry: BalancerRegistry = "1:192.168.34.30,2:192.168.34.31".parse().unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(1), Some(Ipv4Addr::new(192, 168, 34, 30)));
        assert_eq!(registry.get(2), Some(Ipv4Addr::new(192, 168, 34, 31)));
        assert_eq!(registry.get(3), None);
    }

    #[test]
    fn test_registry_rejects_malformed_entries() {
        assert!("192.168.34.30".parse::<BalancerRegistry>().is_err());
        assert!("999:192.168.34.30".parse::<BalancerRegistry>().is_err());
        assert!("1:not-an-ip".parse::<BalancerRegistry>().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            frontend = "eth1"
            backend = "eth2"
            port = 80

            [balancers]
            1 = "192.168.34.30"
            7 = "192.168.34.37"
        "#;
        let config: BridgeConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.balancers.get(7), Some(Ipv4Addr::new(192, 168, 34, 37)));
    }

    #[test]
    fn test_validate_rejects_same_interfaces() {
        let config = BridgeConfig {
            frontend: "eth1".to_string(),
            backend: "eth1".to_string(),
            port: 80,
            balancers: "1:10.0.0.1".parse().unwrap(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_registry() {
        let config = BridgeConfig {
            frontend: "eth1".to_string(),
            backend: "eth2".to_string(),
            port: 80,
            balancers: BalancerRegistry::default(),
        };
        assert!(config.validate().is_err());
    }
}
