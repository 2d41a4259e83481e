//! Error types for the packet bridge.

use thiserror::Error;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors that can occur while splicing flows.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The bounded ephemeral-port search found no free port.
    #[error("no free ephemeral port after {0} attempts")]
    EphemeralPortExhausted(usize),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert!(BridgeError::EphemeralPortExhausted(128)
            .to_string()
            .contains("128"));
    }
}
