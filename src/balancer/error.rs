//! Error types for the balancer.

use thiserror::Error;

/// Result type for balancer operations.
pub type BalancerResult<T> = Result<T, BalancerError>;

/// Errors that can occur while balancing packets.
#[derive(Debug, Error)]
pub enum BalancerError {
    /// The pool could not provide a backend for a flow.
    #[error("no backend available for {0}")]
    NoBackend(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BalancerError::NoBackend("10.0.0.1:40000".to_string());
        assert!(err.to_string().contains("10.0.0.1:40000"));
    }
}
