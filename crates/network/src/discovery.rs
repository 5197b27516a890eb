//! Multicast peer discovery
//!
//! Every node announces itself plus every peer it knows to a multicast
//! group once per interval, and listens on the same group for other
//! nodes' announcements. Rebroadcasting known peers is what makes
//! discovery transitive: a node that never hears C directly still learns
//! about C from B's announcement.
//!
//! Two background tasks share one UDP socket:
//!
//! - **Broadcast task**: sends [`PeerDirectory::announcement`] every interval.
//! - **Listen task**: receives announcements and adds every resolvable,
//!   non-local, not-yet-known address to the directory.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use ribbonworm_core::{
    Announcement, PeerAddr, DISCOVERY_GROUP, DISCOVERY_INTERVAL, DISCOVERY_PORT,
    MAX_DATAGRAM_SIZE, MIN_INTERVAL,
};

use crate::{NetworkError, PeerDirectory, Result};

/// Default bound on waiting for each loop during shutdown
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Discovery configuration
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Multicast group to join and announce to
    pub group: Ipv4Addr,
    /// UDP port of the group
    pub port: u16,
    /// Interval between announcements, at least [`MIN_INTERVAL`]
    pub interval: Duration,
    /// Receive buffer size; longer datagrams are truncated
    pub recv_buffer: usize,
    /// Interface to join the group on. Derived from the directory's local
    /// address when unset.
    pub interface: Option<Ipv4Addr>,
    /// Bound on waiting for each loop during shutdown
    pub shutdown_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            group: DISCOVERY_GROUP,
            port: DISCOVERY_PORT,
            interval: DISCOVERY_INTERVAL,
            recv_buffer: MAX_DATAGRAM_SIZE,
            interface: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

/// Lifecycle state of a background service.
///
/// Callers only ever see `Stopped` or `Running`: `Stopping` is held while
/// [`DiscoveryService::shutdown`] has the service mutably borrowed, and is
/// replaced by `Stopped` before it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Running,
    /// Internal to shutdown: signalled, waiting for the loops to exit
    Stopping,
}

/// Multicast discovery service
pub struct DiscoveryService {
    config: DiscoveryConfig,
    directory: Arc<PeerDirectory>,
    state: ServiceState,
    socket: Option<Arc<UdpSocket>>,
    /// Joined (group, interface), left again on shutdown
    membership: Option<(Ipv4Addr, Ipv4Addr)>,
    shutdown_tx: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl DiscoveryService {
    pub fn new(mut config: DiscoveryConfig, directory: Arc<PeerDirectory>) -> Self {
        config.interval = config.interval.max(MIN_INTERVAL);
        Self {
            config,
            directory,
            state: ServiceState::Stopped,
            socket: None,
            membership: None,
            shutdown_tx: None,
            tasks: Vec::new(),
        }
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    /// Address the discovery socket is bound to, while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Bind the group port, join the group and start both loops.
    ///
    /// Bind or join failure is returned and the service stays stopped.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != ServiceState::Stopped {
            return Err(NetworkError::AlreadyRunning);
        }

        let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.config.port));
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|source| NetworkError::Bind { addr: bind_addr, source })?;

        let group = self.config.group;
        let interface = self.join_interface();
        socket
            .join_multicast_v4(group, interface)
            .map_err(|source| NetworkError::JoinGroup { group, interface, source })?;
        self.membership = Some((group, interface));

        let destination = SocketAddr::V4(SocketAddrV4::new(group, self.config.port));
        self.start_with_socket(socket, destination)?;

        info!(
            "Discovery started (multicast {}:{}, interface {})",
            group, self.config.port, interface
        );
        Ok(())
    }

    /// Start both loops over an already bound socket, announcing to
    /// `destination`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_with_socket(&mut self, socket: UdpSocket, destination: SocketAddr) -> Result<()> {
        if self.state != ServiceState::Stopped {
            return Err(NetworkError::AlreadyRunning);
        }

        let socket = Arc::new(socket);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let broadcast = tokio::spawn(broadcast_loop(
            Arc::clone(&socket),
            destination,
            Arc::clone(&self.directory),
            self.config.interval,
            self.config.recv_buffer,
            shutdown_rx.clone(),
        ));

        let listen = tokio::spawn(listen_loop(
            Arc::clone(&socket),
            Arc::clone(&self.directory),
            self.config.recv_buffer,
            shutdown_rx,
        ));

        self.socket = Some(socket);
        self.shutdown_tx = Some(shutdown_tx);
        self.tasks = vec![broadcast, listen];
        self.state = ServiceState::Running;
        Ok(())
    }

    /// Stop both loops, leave the group and release the socket.
    ///
    /// Each loop is given `shutdown_timeout` to exit and is aborted after
    /// that. Calling this on a stopped service does nothing.
    pub async fn shutdown(&mut self) {
        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            return;
        };

        self.state = ServiceState::Stopping;
        let _ = shutdown_tx.send(true);

        if let (Some(socket), Some((group, interface))) = (&self.socket, self.membership.take()) {
            if let Err(e) = socket.leave_multicast_v4(group, interface) {
                warn!("Discovery: failed to leave multicast group {}: {}", group, e);
            }
        }
        self.socket = None;

        for mut task in self.tasks.drain(..) {
            if tokio::time::timeout(self.config.shutdown_timeout, &mut task)
                .await
                .is_err()
            {
                warn!(
                    "Discovery task did not stop within {:?}, aborting",
                    self.config.shutdown_timeout
                );
                task.abort();
            }
        }

        self.state = ServiceState::Stopped;
        info!("Discovery stopped");
    }

    fn join_interface(&self) -> Ipv4Addr {
        if let Some(interface) = self.config.interface {
            return interface;
        }
        match self.directory.local_addr().ip() {
            std::net::IpAddr::V4(ip) if !ip.is_loopback() => ip,
            _ => Ipv4Addr::UNSPECIFIED,
        }
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Resolve every token of `payload` and add the results to `directory`.
///
/// Returns the newly added peers in payload order. Tokens that fail to
/// resolve are dropped without error.
pub async fn ingest_announcement(directory: &PeerDirectory, payload: &[u8]) -> Vec<PeerAddr> {
    let tokens = Announcement::tokens(payload);
    let resolved = join_all(tokens.iter().map(|t| PeerAddr::resolve(t))).await;

    let mut added = Vec::new();
    for (token, addr) in tokens.iter().zip(resolved) {
        match addr {
            Some(addr) => {
                if directory.add(addr) {
                    info!("Discovery: new peer {}", addr);
                    added.push(addr);
                }
            }
            None => debug!("Discovery: dropping unresolvable token {:?}", token),
        }
    }
    added
}

async fn broadcast_loop(
    socket: Arc<UdpSocket>,
    destination: SocketAddr,
    directory: Arc<PeerDirectory>,
    interval: Duration,
    recv_buffer: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!("Discovery broadcast loop started, announcing to {}", destination);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let payload = directory.announcement().to_bytes();
        if payload.len() > recv_buffer {
            debug!(
                "Discovery: announcement is {} bytes, receivers truncate at {}",
                payload.len(),
                recv_buffer
            );
        }

        match socket.send_to(&payload, destination).await {
            Ok(n) => trace!("Discovery: sent {} byte announcement to {}", n, destination),
            Err(e) => warn!("Discovery: failed to send announcement: {}", e),
        }
    }

    debug!("Discovery broadcast loop exiting");
}

async fn listen_loop(
    socket: Arc<UdpSocket>,
    directory: Arc<PeerDirectory>,
    recv_buffer: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; recv_buffer];

    debug!("Discovery listen loop started");

    loop {
        let received = tokio::select! {
            r = socket.recv_from(&mut buf) => r,
            _ = shutdown.changed() => break,
        };

        match received {
            Ok((len, src)) => {
                trace!("Discovery: {} byte announcement from {}", len, src);
                ingest_announcement(&directory, &buf[..len]).await;
            }
            Err(e) => warn!("Discovery: receive error: {}", e),
        }
    }

    debug!("Discovery listen loop exiting");
}
