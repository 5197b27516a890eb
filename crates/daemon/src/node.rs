//! Node lifecycle

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use ribbonworm_client::ConnectionManager;
use ribbonworm_core::PeerAddr;
use ribbonworm_network::{DiscoveryService, PeerDirectory};
use ribbonworm_relay::RelayForwarder;
use ribbonworm_settings::Settings;

use crate::{DaemonError, Result};

/// One RibbonWorm node: discovery, relay and connection manager sharing a
/// peer directory
pub struct NodeService {
    settings: Settings,
    directory: Arc<PeerDirectory>,
    discovery: DiscoveryService,
    relay: RelayForwarder,
    manager_shutdown: Option<watch::Sender<bool>>,
    manager_task: Option<JoinHandle<()>>,
}

impl NodeService {
    pub fn new(settings: Settings) -> Self {
        let local = settings.local_addr();
        let directory = Arc::new(PeerDirectory::new(local));
        let discovery = DiscoveryService::new(settings.discovery_config(), Arc::clone(&directory));
        let relay = RelayForwarder::new(settings.relay_config());

        Self {
            settings,
            directory,
            discovery,
            relay,
            manager_shutdown: None,
            manager_task: None,
        }
    }

    /// Build from a settings file, or the default location when `path` is
    /// `None`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => Settings::load_from(path)?,
            None => Settings::load_or_default()?,
        };
        Ok(Self::new(settings))
    }

    pub fn local_addr(&self) -> PeerAddr {
        self.directory.local_addr()
    }

    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn relay_addr(&self) -> Option<SocketAddr> {
        self.relay.local_addr()
    }

    pub fn is_running(&self) -> bool {
        self.manager_shutdown.is_some()
    }

    /// Start discovery, then the relay, then the connection manager.
    ///
    /// Discovery and relay failures are returned; whatever was already
    /// started is stopped again first.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(DaemonError::AlreadyRunning);
        }

        info!("Starting node {}", self.local_addr());
        self.discovery.start().await?;

        if let Err(e) = self.relay.start().await {
            self.discovery.shutdown().await;
            return Err(e.into());
        }

        let (tx, rx) = watch::channel(false);
        let manager = ConnectionManager::new(
            Arc::clone(&self.directory),
            self.settings.dialer(),
            self.settings.manager_config(),
        );
        self.manager_task = Some(manager.spawn(rx));
        self.manager_shutdown = Some(tx);

        info!("Node running");
        Ok(())
    }

    /// Stop every component. Calling this when stopped does nothing.
    pub async fn shutdown(&mut self) {
        let Some(tx) = self.manager_shutdown.take() else {
            return;
        };
        let _ = tx.send(true);

        if let Some(mut task) = self.manager_task.take() {
            let timeout = self.shutdown_timeout();
            if tokio::time::timeout(timeout, &mut task).await.is_err() {
                warn!("Connection manager did not stop within {:?}, aborting", timeout);
                task.abort();
            }
        }

        self.discovery.shutdown().await;
        self.relay.shutdown().await;
        info!("Node stopped");
    }

    fn shutdown_timeout(&self) -> Duration {
        self.settings.node.shutdown_timeout()
    }
}

impl Drop for NodeService {
    fn drop(&mut self) {
        if let Some(task) = self.manager_task.take() {
            task.abort();
        }
    }
}
