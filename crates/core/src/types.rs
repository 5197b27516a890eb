use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::CoreError;

/// Multicast group used for peer announcements
pub const DISCOVERY_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

/// UDP port for peer announcements
pub const DISCOVERY_PORT: u16 = 7237;

/// TCP port every node relays on (and every target is dialed on)
pub const RELAY_PORT: u16 = 9090;

/// Loopback port of the local SOCKS5 proxy
pub const PROXY_PORT: u16 = 1080;

/// Interval between announcements
pub const DISCOVERY_INTERVAL: Duration = Duration::from_secs(1);

/// Interval between connection rounds
pub const CONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Shortest period accepted for the announcement and connection loops
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Bound on a single proxy dial
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Receive buffer for announcement datagrams; larger payloads are truncated
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// Bound on a DNS lookup for a non-literal address token
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(1);

/// Public address used only to pick the outbound interface; nothing is sent
const ROUTE_PROBE: (Ipv4Addr, u16) = (Ipv4Addr::new(8, 8, 8, 8), 80);

/// Address of a peer on the local network.
///
/// Identity is the resolved IP; the port is implied by context (relay port
/// for tunnels), so two tokens naming the same host compare equal. Every
/// constructor canonicalises the IP, so an IPv4-mapped IPv6 address is the
/// same peer as its IPv4 form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "IpAddr", into = "IpAddr")]
pub struct PeerAddr(IpAddr);

impl PeerAddr {
    pub const fn new(ip: IpAddr) -> Self {
        Self(ip.to_canonical())
    }

    pub fn ip(&self) -> IpAddr {
        self.0
    }

    /// Socket address of this peer on `port`
    pub fn socket_addr(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.0, port)
    }

    /// Parse a literal IPv4/IPv6 token, ignoring surrounding whitespace
    pub fn parse(token: &str) -> Option<Self> {
        token.trim().parse::<IpAddr>().ok().map(Self::new)
    }

    /// Resolve a token to an address.
    ///
    /// Literal addresses are taken as-is. Anything that looks like a host
    /// name is looked up (IPv4 preferred). Returns `None` for anything that
    /// fails to resolve.
    pub async fn resolve(token: &str) -> Option<Self> {
        let token = token.trim();
        if let Some(addr) = Self::parse(token) {
            return Some(addr);
        }
        if !is_hostname(token) {
            return None;
        }

        let lookup = tokio::time::timeout(RESOLVE_TIMEOUT, tokio::net::lookup_host((token, 0)));
        let addrs: Vec<SocketAddr> = match lookup.await {
            Ok(Ok(addrs)) => addrs.collect(),
            Ok(Err(e)) => {
                debug!("Lookup of {:?} failed: {}", token, e);
                return None;
            }
            Err(_) => {
                debug!("Lookup of {:?} timed out", token);
                return None;
            }
        };

        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .map(|a| Self::new(a.ip()))
    }
}

impl From<IpAddr> for PeerAddr {
    fn from(ip: IpAddr) -> Self {
        Self::new(ip)
    }
}

impl From<PeerAddr> for IpAddr {
    fn from(addr: PeerAddr) -> Self {
        addr.0
    }
}

impl From<Ipv4Addr> for PeerAddr {
    fn from(ip: Ipv4Addr) -> Self {
        Self(IpAddr::V4(ip))
    }
}

impl FromStr for PeerAddr {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| CoreError::InvalidAddress(s.to_string()))
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Syntactic host name check (RFC 1123 labels, not purely numeric)
fn is_hostname(token: &str) -> bool {
    if token.is_empty() || token.len() > 253 {
        return false;
    }
    if token.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return false;
    }
    token.trim_end_matches('.').split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// Detect this host's primary address.
///
/// Connects an unbound UDP socket towards a public address so the OS picks
/// the outbound interface, then reads the local side. Falls back to
/// loopback when there is no route.
pub fn detect_local_addr() -> PeerAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(ROUTE_PROBE)?;
        Ok(socket.local_addr()?.ip())
    };

    match probe() {
        Ok(ip) if !ip.is_unspecified() => PeerAddr::new(ip),
        Ok(_) => PeerAddr(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        Err(e) => {
            debug!("No route for local address detection ({}), using loopback", e);
            PeerAddr(IpAddr::V4(Ipv4Addr::LOCALHOST))
        }
    }
}
