//! Outbound dialers
//!
//! Every peer-directed connection goes through a [`Dialer`]. In a
//! deployment that is the local SOCKS5 proxy; plain TCP is available for
//! networks where no proxy runs.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;

use ribbonworm_core::{CONNECT_TIMEOUT, PROXY_PORT};

use crate::{ClientError, Result};

/// Opens a byte stream to a peer's relay port
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn dial(&self, target: SocketAddr) -> Result<Self::Stream>;
}

/// Dials through a SOCKS5 proxy (CONNECT, no auth)
#[derive(Debug, Clone)]
pub struct Socks5Dialer {
    proxy: SocketAddr,
    timeout: Duration,
}

impl Socks5Dialer {
    pub fn new(proxy: SocketAddr, timeout: Duration) -> Self {
        Self { proxy, timeout }
    }

    pub fn proxy(&self) -> SocketAddr {
        self.proxy
    }
}

impl Default for Socks5Dialer {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], PROXY_PORT)), CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl Dialer for Socks5Dialer {
    type Stream = TcpStream;

    /// The timeout covers both the proxy connection and the CONNECT
    /// handshake.
    async fn dial(&self, target: SocketAddr) -> Result<TcpStream> {
        let stream = tokio::time::timeout(self.timeout, Socks5Stream::connect(self.proxy, target))
            .await
            .map_err(|_| ClientError::DialTimeout(target))??;
        Ok(stream.into_inner())
    }
}

/// Dials peers directly over TCP
#[derive(Debug, Clone)]
pub struct TcpDialer {
    timeout: Duration,
}

impl TcpDialer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self::new(CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    type Stream = TcpStream;

    async fn dial(&self, target: SocketAddr) -> Result<TcpStream> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(target))
            .await
            .map_err(|_| ClientError::DialTimeout(target))??;
        Ok(stream)
    }
}

/// Dialer chosen at runtime from settings
#[derive(Debug, Clone)]
pub enum PeerDialer {
    Proxy(Socks5Dialer),
    Direct(TcpDialer),
}

impl PeerDialer {
    pub fn new(use_proxy: bool, proxy: SocketAddr, timeout: Duration) -> Self {
        if use_proxy {
            PeerDialer::Proxy(Socks5Dialer::new(proxy, timeout))
        } else {
            PeerDialer::Direct(TcpDialer::new(timeout))
        }
    }
}

#[async_trait]
impl Dialer for PeerDialer {
    type Stream = TcpStream;

    async fn dial(&self, target: SocketAddr) -> Result<TcpStream> {
        match self {
            PeerDialer::Proxy(d) => d.dial(target).await,
            PeerDialer::Direct(d) => d.dial(target).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn free_port() -> u16 {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap().port()
    }

    #[test]
    fn test_default_proxy_is_loopback() {
        let dialer = Socks5Dialer::default();
        assert_eq!(dialer.proxy(), "127.0.0.1:1080".parse().unwrap());
    }

    #[test]
    fn test_peer_dialer_selection() {
        let proxy = "127.0.0.1:1080".parse().unwrap();
        let timeout = Duration::from_secs(1);
        assert!(matches!(PeerDialer::new(true, proxy, timeout), PeerDialer::Proxy(_)));
        assert!(matches!(PeerDialer::new(false, proxy, timeout), PeerDialer::Direct(_)));
    }

    #[tokio::test]
    async fn test_tcp_dialer_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let stream = TcpDialer::default().dial(addr).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn test_tcp_dialer_refused() {
        let addr = SocketAddr::from(([127, 0, 0, 1], free_port().await));
        let err = TcpDialer::default().dial(addr).await.unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));
    }

    #[tokio::test]
    async fn test_socks5_dialer_without_proxy_fails() {
        let proxy = SocketAddr::from(([127, 0, 0, 1], free_port().await));
        let dialer = Socks5Dialer::new(proxy, Duration::from_secs(1));
        let err = dialer
            .dial("127.0.0.1:9090".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Proxy(_)));
    }

    #[tokio::test]
    async fn test_socks5_dialer_times_out_on_silent_proxy() {
        // Accepts but never answers the greeting
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let (_s, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let target: SocketAddr = "127.0.0.1:9090".parse().unwrap();
        let dialer = Socks5Dialer::new(proxy, Duration::from_millis(200));
        let err = dialer.dial(target).await.unwrap_err();
        assert!(matches!(err, ClientError::DialTimeout(t) if t == target));
    }
}
