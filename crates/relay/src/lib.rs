//! RibbonWorm Relay
//!
//! Lets this node act as a one-hop relay for other peers. A relay
//! connection opens with a single line naming the target; after that the
//! relay is protocol-agnostic and copies bytes in both directions.

mod forwarder;
mod session;

pub use forwarder::{handle_connection, RelayConfig, RelayForwarder, RequestOutcome};
pub use session::{Direction, SessionEnd, TunnelSession};

use std::net::SocketAddr;

use thiserror::Error;

use ribbonworm_core::CoreError;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Failed to bind relay listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Invalid relay request: {0}")]
    Request(#[from] CoreError),

    #[error("Unresolvable relay target: {0:?}")]
    UnresolvableTarget(String),

    #[error("Dial to {0} timed out")]
    DialTimeout(SocketAddr),

    #[error("Dial to {target} failed: {source}")]
    DialFailed {
        target: SocketAddr,
        source: std::io::Error,
    },

    #[error("Relay already running")]
    AlreadyRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_unresolvable() {
        let err = RelayError::UnresolvableTarget("bogus!".to_string());
        assert_eq!(err.to_string(), "Unresolvable relay target: \"bogus!\"");
    }

    #[test]
    fn test_error_display_dial_timeout() {
        let err = RelayError::DialTimeout("10.0.0.2:9090".parse().unwrap());
        assert_eq!(err.to_string(), "Dial to 10.0.0.2:9090 timed out");
    }

    #[test]
    fn test_error_from_core() {
        let err: RelayError = CoreError::RequestTooLong { len: 300, max: 256 }.into();
        assert_eq!(
            err.to_string(),
            "Invalid relay request: Relay request too long: 300 bytes (max 256)"
        );
    }
}
