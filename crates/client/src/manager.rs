//! Connection manager
//!
//! Once per interval the manager takes a snapshot of the peer directory
//! and, for each peer, tries a direct dial to its relay port. When that
//! fails every other peer in the snapshot is tried in order as a relay
//! hop: the first hop that accepts gets a relay request naming the target
//! and the attempt counts as a success. Nothing past the first hop is
//! observed.
//!
//! Failed peers carry no state between rounds; every peer is retried on
//! the next interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use ribbonworm_core::{PeerAddr, RelayRequest, CONNECT_INTERVAL, MIN_INTERVAL, RELAY_PORT};
use ribbonworm_network::PeerDirectory;

use crate::Dialer;

/// Connection manager configuration
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Port dialed on every peer, direct or as a hop
    pub relay_port: u16,
    /// Time between the start of consecutive rounds, at least
    /// [`MIN_INTERVAL`]
    pub interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            relay_port: RELAY_PORT,
            interval: CONNECT_INTERVAL,
        }
    }
}

/// Path taken by an open connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Direct,
    Relayed { via: PeerAddr },
}

/// An established path to a peer
pub struct Connection<S> {
    pub target: PeerAddr,
    pub route: Route,
    pub stream: S,
}

/// Outcome for one peer in one round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Direct,
    Relayed { via: PeerAddr },
    Unreachable,
}

impl From<Option<Route>> for Reachability {
    fn from(route: Option<Route>) -> Self {
        match route {
            Some(Route::Direct) => Reachability::Direct,
            Some(Route::Relayed { via }) => Reachability::Relayed { via },
            None => Reachability::Unreachable,
        }
    }
}

/// Per-peer results of a round, in snapshot order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub outcomes: Vec<(PeerAddr, Reachability)>,
}

impl RoundReport {
    pub fn get(&self, peer: &PeerAddr) -> Option<Reachability> {
        self.outcomes
            .iter()
            .find(|(p, _)| p == peer)
            .map(|(_, r)| *r)
    }

    pub fn direct_count(&self) -> usize {
        self.count(|r| matches!(r, Reachability::Direct))
    }

    pub fn relayed_count(&self) -> usize {
        self.count(|r| matches!(r, Reachability::Relayed { .. }))
    }

    pub fn unreachable_count(&self) -> usize {
        self.count(|r| matches!(r, Reachability::Unreachable))
    }

    fn count(&self, pred: impl Fn(&Reachability) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, r)| pred(r)).count()
    }
}

pub struct ConnectionManager<D> {
    directory: Arc<PeerDirectory>,
    dialer: D,
    config: ManagerConfig,
}

impl<D: Dialer> ConnectionManager<D> {
    pub fn new(directory: Arc<PeerDirectory>, dialer: D, mut config: ManagerConfig) -> Self {
        config.interval = config.interval.max(MIN_INTERVAL);
        Self {
            directory,
            dialer,
            config,
        }
    }

    pub fn dialer(&self) -> &D {
        &self.dialer
    }

    /// Reach `target` directly, else through the first peer in `snapshot`
    /// that accepts a relay request for it.
    pub async fn connect(
        &self,
        target: PeerAddr,
        snapshot: &[PeerAddr],
    ) -> Option<Connection<D::Stream>> {
        let direct = target.socket_addr(self.config.relay_port);
        match self.dialer.dial(direct).await {
            Ok(stream) => {
                return Some(Connection {
                    target,
                    route: Route::Direct,
                    stream,
                })
            }
            Err(e) => debug!("Direct connect to {} failed: {}", target, e),
        }

        for &hop in snapshot.iter().filter(|&&hop| hop != target) {
            match self.relay_through(hop, target).await {
                Ok(stream) => {
                    return Some(Connection {
                        target,
                        route: Route::Relayed { via: hop },
                        stream,
                    })
                }
                Err(e) => debug!("Relay via {} to {} failed: {}", hop, target, e),
            }
        }

        None
    }

    async fn relay_through(&self, hop: PeerAddr, target: PeerAddr) -> crate::Result<D::Stream> {
        let mut stream = self.dialer.dial(hop.socket_addr(self.config.relay_port)).await?;
        RelayRequest::new(target).write_to(&mut stream).await?;
        Ok(stream)
    }

    /// One pass over a directory snapshot. Streams are dropped as soon as
    /// they are established.
    pub async fn run_round(&self) -> RoundReport {
        let snapshot = self.directory.snapshot();
        let mut report = RoundReport::default();

        for &target in &snapshot {
            let route = self.connect(target, &snapshot).await.map(|conn| conn.route);
            let reachability = Reachability::from(route);
            match reachability {
                Reachability::Direct => debug!("Reached {} directly", target),
                Reachability::Relayed { via } => debug!("Reached {} via {}", target, via),
                Reachability::Unreachable => warn!("Peer {} unreachable this round", target),
            }
            report.outcomes.push((target, reachability));
        }

        if !report.outcomes.is_empty() {
            debug!(
                "Connection round: {} direct, {} relayed, {} unreachable",
                report.direct_count(),
                report.relayed_count(),
                report.unreachable_count()
            );
        }
        report
    }

    /// Run rounds every interval until `shutdown` flips to true or its
    /// sender is dropped. A round in progress is abandoned on shutdown.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Connection manager started");

            loop {
                if *shutdown.borrow() {
                    break;
                }

                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }

                tokio::select! {
                    _ = self.run_round() => {}
                    _ = shutdown.changed() => break,
                }
            }

            debug!("Connection manager exiting");
        })
    }
}
