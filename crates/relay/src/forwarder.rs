//! Relay forwarder
//!
//! Listens on the relay port so that other peers can use this node as a
//! hop. Each accepted connection names its target in a single request
//! line; the forwarder dials that target on the relay port and bridges the
//! two connections until either side closes.
//!
//! Concurrency is capped by a semaphore: a connection that arrives while
//! every permit is taken is closed straight away instead of queued.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use ribbonworm_core::{CoreError, RelayRequest, MAX_REQUEST_LEN, RELAY_PORT};

use crate::{RelayError, Result, SessionEnd, TunnelSession};

/// Default cap on concurrent relay connections
const DEFAULT_MAX_SESSIONS: usize = 256;

/// Default bound on dialing the requested target
const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to accept relay connections on
    pub listen_addr: SocketAddr,
    /// Port dialed on every requested target
    pub target_port: u16,
    /// Maximum concurrent relay connections, clamped to
    /// `1..=Semaphore::MAX_PERMITS`
    pub max_sessions: usize,
    /// Bound on dialing the requested target
    pub dial_timeout: Duration,
    /// Maximum request line length, newline excluded
    pub max_request_len: usize,
    /// Bound on waiting for the accept loop during shutdown
    pub shutdown_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], RELAY_PORT)),
            target_port: RELAY_PORT,
            max_sessions: DEFAULT_MAX_SESSIONS,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            max_request_len: MAX_REQUEST_LEN,
            shutdown_timeout: Duration::from_secs(1),
        }
    }
}

/// Result of handling one relay connection
#[derive(Debug)]
pub enum RequestOutcome {
    /// The connection closed before a request line arrived
    Empty,
    /// A tunnel to `target` ran and ended
    Bridged { target: SocketAddr, end: SessionEnd },
}

/// Relay forwarder: accept loop plus one handler per connection
pub struct RelayForwarder {
    config: Arc<RelayConfig>,
    sessions: Arc<Semaphore>,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<watch::Sender<bool>>,
    accept_task: Option<JoinHandle<()>>,
}

impl RelayForwarder {
    pub fn new(mut config: RelayConfig) -> Self {
        config.max_sessions = config.max_sessions.clamp(1, Semaphore::MAX_PERMITS);
        let sessions = Arc::new(Semaphore::new(config.max_sessions));
        Self {
            config: Arc::new(config),
            sessions,
            local_addr: None,
            shutdown_tx: None,
            accept_task: None,
        }
    }

    /// Bind the listener and start accepting.
    ///
    /// Returns the bound address. Bind failure is returned and nothing is
    /// started.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.shutdown_tx.is_some() {
            return Err(RelayError::AlreadyRunning);
        }

        let addr = self.config.listen_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RelayError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        info!("Relay listening on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.config),
            Arc::clone(&self.sessions),
            shutdown_rx,
        ));

        self.local_addr = Some(local_addr);
        self.shutdown_tx = Some(shutdown_tx);
        self.accept_task = Some(task);
        Ok(local_addr)
    }

    /// Bound listener address, while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// Number of relay connections currently being handled
    pub fn active_sessions(&self) -> usize {
        self.config.max_sessions - self.sessions.available_permits()
    }

    /// Stop accepting, close the listener and force-close in-flight
    /// sessions. Calling this when stopped does nothing.
    pub async fn shutdown(&mut self) {
        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            return;
        };
        let _ = shutdown_tx.send(true);

        if let Some(mut task) = self.accept_task.take() {
            if tokio::time::timeout(self.config.shutdown_timeout, &mut task)
                .await
                .is_err()
            {
                warn!(
                    "Relay accept loop did not stop within {:?}, aborting",
                    self.config.shutdown_timeout
                );
                task.abort();
            }
        }

        self.local_addr = None;
        info!("Relay stopped");
    }
}

impl Drop for RelayForwarder {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: Arc<RelayConfig>,
    sessions: Arc<Semaphore>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut handlers = JoinSet::new();

    loop {
        while let Some(result) = handlers.try_join_next() {
            if let Err(e) = result {
                if e.is_panic() {
                    warn!("Relay handler panicked: {}", e);
                }
            }
        }

        let accepted = tokio::select! {
            r = listener.accept() => r,
            _ = shutdown.changed() => break,
        };

        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Relay accept error: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        let permit = match Arc::clone(&sessions).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    "Relay at capacity ({} sessions), rejecting {}",
                    config.max_sessions, peer
                );
                continue;
            }
        };

        debug!("Relay: accepted connection from {}", peer);
        let config = Arc::clone(&config);
        handlers.spawn(async move {
            let _permit = permit;
            match handle_connection(stream, peer, &config).await {
                Ok(RequestOutcome::Empty) => {
                    debug!("Relay: {} closed without a request", peer);
                }
                Ok(RequestOutcome::Bridged { target, end }) => match end.error {
                    None => debug!(
                        "Relay: tunnel {} -> {} ended ({:?} closed first after {} bytes)",
                        peer, target, end.closed_first, end.bytes
                    ),
                    Some(kind) => debug!(
                        "Relay: tunnel {} -> {} ended ({:?} leg failed: {})",
                        peer, target, end.closed_first, kind
                    ),
                },
                Err(e) => warn!("Relay: failed to relay connection from {}: {}", peer, e),
            }
        });
    }

    drop(listener);
    if !handlers.is_empty() {
        debug!("Relay: closing {} in-flight connections", handlers.len());
    }
    handlers.shutdown().await;
    debug!("Relay accept loop exiting");
}

/// Read the request line from `stream`, dial the named target and bridge
/// the two connections until either closes.
///
/// Bytes the seeker sent right after the request line are forwarded to
/// the target before bridging starts.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    config: &RelayConfig,
) -> Result<RequestOutcome> {
    let mut reader = BufReader::new(stream);

    let request = match RelayRequest::read_from(&mut reader, config.max_request_len).await {
        Ok(Some(request)) => request,
        Ok(None) => return Ok(RequestOutcome::Empty),
        Err(CoreError::Io(e)) => {
            debug!("Relay: {} dropped before sending a request: {}", peer, e);
            return Ok(RequestOutcome::Empty);
        }
        Err(e) => return Err(e.into()),
    };

    let target_ip = request
        .resolve()
        .await
        .ok_or_else(|| RelayError::UnresolvableTarget(request.target().to_string()))?;
    let target = target_ip.socket_addr(config.target_port);

    let mut outbound = tokio::time::timeout(config.dial_timeout, TcpStream::connect(target))
        .await
        .map_err(|_| RelayError::DialTimeout(target))?
        .map_err(|source| RelayError::DialFailed { target, source })?;

    let pending = reader.buffer().to_vec();
    let inbound = reader.into_inner();
    if !pending.is_empty() {
        outbound.write_all(&pending).await?;
    }

    debug!("Relay: tunnel {} -> {} established", peer, target);
    let end = TunnelSession::new(inbound, outbound).run().await;
    Ok(RequestOutcome::Bridged { target, end })
}
