//! RibbonWorm Network
//!
//! Peer membership for the local network.
//!
//! ## Components
//!
//! - **PeerDirectory**: lock-guarded set of known peer addresses
//! - **DiscoveryService**: multicast announce/listen loops that keep the
//!   directory populated, including peers learned second-hand

mod directory;
mod discovery;

pub use directory::PeerDirectory;
pub use discovery::{ingest_announcement, DiscoveryConfig, DiscoveryService, ServiceState};

use std::net::{Ipv4Addr, SocketAddr};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Failed to bind discovery socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Failed to join multicast group {group} on {interface}: {source}")]
    JoinGroup {
        group: Ipv4Addr,
        interface: Ipv4Addr,
        source: std::io::Error,
    },

    #[error("Discovery already running")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, NetworkError>;
