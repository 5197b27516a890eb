//! RibbonWorm Daemon
//!
//! Composes discovery, the relay forwarder and the connection manager
//! into one node with a single `start()` / `shutdown()` lifecycle. The
//! `ribbonworm` binary wraps it with settings loading and signal handling.

mod node;

pub use node::NodeService;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Discovery error: {0}")]
    Network(#[from] ribbonworm_network::NetworkError),

    #[error("Relay error: {0}")]
    Relay(#[from] ribbonworm_relay::RelayError),

    #[error("Settings error: {0}")]
    Settings(#[from] ribbonworm_settings::SettingsError),

    #[error("Already running")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, DaemonError>;
