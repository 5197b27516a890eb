//! Configuration types

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use ribbonworm_client::{ManagerConfig, PeerDialer};
use ribbonworm_core::{
    detect_local_addr, PeerAddr, CONNECT_INTERVAL, CONNECT_TIMEOUT, DISCOVERY_GROUP,
    DISCOVERY_INTERVAL, DISCOVERY_PORT, MAX_DATAGRAM_SIZE, MAX_REQUEST_LEN, MIN_INTERVAL,
    PROXY_PORT, RELAY_PORT,
};
use ribbonworm_network::DiscoveryConfig;
use ribbonworm_relay::RelayConfig;

use crate::{default_settings_path, Result, SettingsError};

/// Main settings structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub discovery: DiscoverySettings,

    #[serde(default)]
    pub relay: RelaySettings,

    #[serde(default)]
    pub client: ClientSettings,

    #[serde(default)]
    pub node: NodeSettings,

    /// Path the settings were loaded from (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

impl Settings {
    /// Load settings from the default path, or create defaults
    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&default_settings_path())
    }

    /// Load settings from a specific path, or create defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(SettingsError::ReadError)?;
            let settings: Settings =
                serde_json::from_str(&content).map_err(SettingsError::ParseError)?;
            info!("Loaded settings from {:?}", path);
            settings
        } else {
            Self::default()
        };
        settings.config_path = Some(path.to_path_buf());
        Ok(settings)
    }

    /// Save settings to the path they were loaded from
    pub fn save(&self) -> Result<()> {
        let path = self.config_path.clone().unwrap_or_else(default_settings_path);
        self.save_to(&path)
    }

    /// Save settings to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(SettingsError::CreateDirError)?;
            }
        }

        let content = serde_json::to_string_pretty(self).map_err(SettingsError::ParseError)?;
        std::fs::write(path, content).map_err(SettingsError::WriteError)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Address announced as this node: configured, else detected
    pub fn local_addr(&self) -> PeerAddr {
        self.node
            .advertise_addr
            .map(PeerAddr::from)
            .unwrap_or_else(detect_local_addr)
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            group: self.discovery.group,
            port: self.discovery.port,
            interval: Duration::from_millis(self.discovery.interval_ms).max(MIN_INTERVAL),
            recv_buffer: self.discovery.recv_buffer,
            interface: self.discovery.interface,
            shutdown_timeout: self.node.shutdown_timeout(),
        }
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            listen_addr: self.relay.listen_addr,
            target_port: self.relay.port,
            max_sessions: self.relay.max_sessions,
            dial_timeout: Duration::from_millis(self.relay.dial_timeout_ms),
            max_request_len: self.relay.max_request_len,
            shutdown_timeout: self.node.shutdown_timeout(),
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            relay_port: self.relay.port,
            interval: Duration::from_millis(self.client.interval_ms).max(MIN_INTERVAL),
        }
    }

    pub fn dialer(&self) -> PeerDialer {
        PeerDialer::new(
            self.client.use_proxy,
            self.client.proxy_addr,
            Duration::from_millis(self.client.connect_timeout_ms),
        )
    }
}

/// Multicast discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    #[serde(default = "default_group")]
    pub group: Ipv4Addr,

    #[serde(default = "default_discovery_port")]
    pub port: u16,

    /// Announcement interval in milliseconds
    #[serde(default = "default_discovery_interval_ms")]
    pub interval_ms: u64,

    /// Largest datagram read; longer ones are truncated
    #[serde(default = "default_recv_buffer")]
    pub recv_buffer: usize,

    /// IPv4 address of the interface to join the group on
    #[serde(default)]
    pub interface: Option<Ipv4Addr>,
}

fn default_group() -> Ipv4Addr {
    DISCOVERY_GROUP
}

fn default_discovery_port() -> u16 {
    DISCOVERY_PORT
}

fn default_discovery_interval_ms() -> u64 {
    DISCOVERY_INTERVAL.as_millis() as u64
}

fn default_recv_buffer() -> usize {
    MAX_DATAGRAM_SIZE
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            group: default_group(),
            port: default_discovery_port(),
            interval_ms: default_discovery_interval_ms(),
            recv_buffer: default_recv_buffer(),
            interface: None,
        }
    }
}

/// Relay forwarder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    #[serde(default = "default_relay_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Relay port dialed on every peer and target
    #[serde(default = "default_relay_port")]
    pub port: u16,

    /// Concurrent relay connections; extra ones are refused
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,

    #[serde(default = "default_max_request_len")]
    pub max_request_len: usize,
}

fn default_relay_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], RELAY_PORT))
}

fn default_relay_port() -> u16 {
    RELAY_PORT
}

fn default_max_sessions() -> usize {
    256
}

fn default_dial_timeout_ms() -> u64 {
    10_000
}

fn default_max_request_len() -> usize {
    MAX_REQUEST_LEN
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            listen_addr: default_relay_listen_addr(),
            port: default_relay_port(),
            max_sessions: default_max_sessions(),
            dial_timeout_ms: default_dial_timeout_ms(),
            max_request_len: default_max_request_len(),
        }
    }
}

/// Outbound connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Local SOCKS5 proxy
    #[serde(default = "default_proxy_addr")]
    pub proxy_addr: SocketAddr,

    /// Dial peers through the proxy; plain TCP when false
    #[serde(default = "default_true")]
    pub use_proxy: bool,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Interval between connection rounds in milliseconds
    #[serde(default = "default_connect_interval_ms")]
    pub interval_ms: u64,
}

fn default_proxy_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], PROXY_PORT))
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    CONNECT_TIMEOUT.as_millis() as u64
}

fn default_connect_interval_ms() -> u64 {
    CONNECT_INTERVAL.as_millis() as u64
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            proxy_addr: default_proxy_addr(),
            use_proxy: true,
            connect_timeout_ms: default_connect_timeout_ms(),
            interval_ms: default_connect_interval_ms(),
        }
    }
}

/// Node-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Address announced as this node; detected when unset
    #[serde(default)]
    pub advertise_addr: Option<IpAddr>,

    /// Bound on waiting for each loop to exit during shutdown
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_shutdown_timeout_ms() -> u64 {
    1000
}

impl NodeSettings {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            advertise_addr: None,
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.discovery.group, Ipv4Addr::new(224, 0, 0, 251));
        assert_eq!(settings.discovery.port, 7237);
        assert_eq!(settings.discovery.recv_buffer, 1024);
        assert_eq!(settings.relay.listen_addr, "0.0.0.0:9090".parse().unwrap());
        assert_eq!(settings.relay.port, 9090);
        assert_eq!(settings.client.proxy_addr, "127.0.0.1:1080".parse().unwrap());
        assert!(settings.client.use_proxy);
        assert!(settings.node.advertise_addr.is_none());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let json = r#"{ "relay": { "port": 9191 }, "node": { "advertise_addr": "10.0.0.9" } }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();

        assert_eq!(settings.relay.port, 9191);
        assert_eq!(settings.relay.max_sessions, 256);
        assert_eq!(settings.discovery.port, 7237);
        assert_eq!(settings.client.connect_timeout_ms, 1000);
        assert_eq!(settings.local_addr().to_string(), "10.0.0.9");
    }

    #[test]
    fn test_component_configs() {
        let mut settings = Settings::default();
        settings.relay.port = 9191;
        settings.relay.dial_timeout_ms = 2500;
        settings.node.shutdown_timeout_ms = 300;
        settings.client.interval_ms = 50;

        let relay = settings.relay_config();
        assert_eq!(relay.target_port, 9191);
        assert_eq!(relay.dial_timeout, Duration::from_millis(2500));
        assert_eq!(relay.shutdown_timeout, Duration::from_millis(300));

        let discovery = settings.discovery_config();
        assert_eq!(discovery.interval, Duration::from_secs(1));
        assert_eq!(discovery.shutdown_timeout, Duration::from_millis(300));

        let manager = settings.manager_config();
        assert_eq!(manager.relay_port, 9191);
        assert_eq!(manager.interval, Duration::from_millis(50));
    }

    #[test]
    fn test_zero_intervals_clamped() {
        let json = r#"{ "discovery": { "interval_ms": 0 }, "client": { "interval_ms": 0 } }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();

        assert_eq!(settings.discovery_config().interval, MIN_INTERVAL);
        assert_eq!(settings.manager_config().interval, MIN_INTERVAL);
    }

    #[test]
    fn test_dialer_follows_use_proxy() {
        let mut settings = Settings::default();
        assert!(matches!(settings.dialer(), PeerDialer::Proxy(_)));
        settings.client.use_proxy = false;
        assert!(matches!(settings.dialer(), PeerDialer::Direct(_)));
    }

    #[test]
    fn test_missing_file_gives_defaults_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.relay.port, 9090);
        assert_eq!(settings.config_path(), Some(path.as_path()));
        assert!(!path.exists());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Settings::load_from(&path).unwrap();
        settings.discovery.interface = Some(Ipv4Addr::new(192, 168, 1, 20));
        settings.client.use_proxy = false;
        settings.save().unwrap();
        assert!(path.exists());

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.discovery.interface, Some(Ipv4Addr::new(192, 168, 1, 20)));
        assert!(!loaded.client.use_proxy);
    }

    #[test]
    fn test_invalid_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = Settings::load_from(&path).unwrap_err();
        assert!(matches!(err, SettingsError::ParseError(_)));
    }
}
