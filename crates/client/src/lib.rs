//! RibbonWorm Client
//!
//! Outbound reachability: every known peer is dialed through the local
//! SOCKS5 proxy, first directly and then through each other peer acting
//! as a one-hop relay.
//!
//! ## Components
//!
//! - **Dialer**: how a TCP connection to a peer is opened (proxy or plain)
//! - **ConnectionManager**: periodic direct-then-relay rounds over a
//!   snapshot of the peer directory

mod dialer;
mod manager;

pub use dialer::{Dialer, PeerDialer, Socks5Dialer, TcpDialer};
pub use manager::{
    Connection, ConnectionManager, ManagerConfig, Reachability, RoundReport, Route,
};

use std::net::SocketAddr;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connect to {0} timed out")]
    DialTimeout(SocketAddr),

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Relay request error: {0}")]
    Request(#[from] ribbonworm_core::CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_socks::Error> for ClientError {
    fn from(e: tokio_socks::Error) -> Self {
        ClientError::Proxy(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ClientError::DialTimeout("10.0.0.3:9090".parse().unwrap());
        assert_eq!(err.to_string(), "Connect to 10.0.0.3:9090 timed out");

        let err = ClientError::Proxy("connection refused".to_string());
        assert_eq!(err.to_string(), "Proxy error: connection refused");
    }
}
