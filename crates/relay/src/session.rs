//! Tunnel session
//!
//! Bridges an inbound leg (from the relay-seeking peer) and an outbound
//! leg (to the resolved target). Bytes are copied unmodified in both
//! directions. The first direction to reach end-of-stream or fail ends the
//! whole session; half-close is not propagated separately. A leg that fails
//! mid-stream (reset, broken pipe) ends the session like a close does.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Copy direction within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Seeker to target
    Upstream,
    /// Target to seeker
    Downstream,
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEnd {
    /// Direction whose source closed first
    pub closed_first: Direction,
    /// Bytes copied in that direction, 0 when it failed
    pub bytes: u64,
    /// Set when that direction ended with an I/O error instead of EOF
    pub error: Option<io::ErrorKind>,
}

/// A pair of connected streams bridged byte-for-byte
pub struct TunnelSession<I, O> {
    inbound: I,
    outbound: O,
}

impl<I, O> TunnelSession<I, O>
where
    I: AsyncRead + AsyncWrite + Unpin + Send,
    O: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(inbound: I, outbound: O) -> Self {
        Self { inbound, outbound }
    }

    /// Forward in both directions until either side ends.
    ///
    /// Both legs are shut down and released on return, whichever side
    /// closed. Dropping the future has the same effect.
    pub async fn run(self) -> SessionEnd {
        let (mut in_read, mut in_write) = tokio::io::split(self.inbound);
        let (mut out_read, mut out_write) = tokio::io::split(self.outbound);

        let (closed_first, copied) = tokio::select! {
            r = tokio::io::copy(&mut in_read, &mut out_write) => (Direction::Upstream, r),
            r = tokio::io::copy(&mut out_read, &mut in_write) => (Direction::Downstream, r),
        };

        // The other side may already be gone
        let _ = out_write.shutdown().await;
        let _ = in_write.shutdown().await;

        match copied {
            Ok(bytes) => SessionEnd {
                closed_first,
                bytes,
                error: None,
            },
            Err(e) => SessionEnd {
                closed_first,
                bytes: 0,
                error: Some(e.kind()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, ReadBuf};

    /// Stream whose read side fails with a connection reset
    struct ResetLeg;

    impl AsyncRead for ResetLeg {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()))
        }
    }

    impl AsyncWrite for ResetLeg {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_bytes_flow_both_ways_unaltered() {
        let (seeker, relay_in) = tokio::io::duplex(1024);
        let (relay_out, target) = tokio::io::duplex(1024);

        let session = tokio::spawn(TunnelSession::new(relay_in, relay_out).run());

        let (mut seeker_r, mut seeker_w) = tokio::io::split(seeker);
        let (mut target_r, mut target_w) = tokio::io::split(target);

        let payload: Vec<u8> = (0..=255u8).collect();
        seeker_w.write_all(&payload).await.unwrap();
        let mut got = vec![0u8; payload.len()];
        target_r.read_exact(&mut got).await.unwrap();
        assert_eq!(got, payload);

        target_w.write_all(b"pong\n").await.unwrap();
        let mut reply = [0u8; 5];
        seeker_r.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"pong\n");

        // Seeker closes: session ends upstream-first and target sees EOF
        drop(seeker_w);
        drop(seeker_r);
        let end = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(end.closed_first, Direction::Upstream);
        assert_eq!(end.bytes, payload.len() as u64);
        assert_eq!(end.error, None);

        let mut rest = Vec::new();
        target_r.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_target_close_tears_down_session() {
        let (seeker, relay_in) = tokio::io::duplex(1024);
        let (relay_out, target) = tokio::io::duplex(1024);

        let session = tokio::spawn(TunnelSession::new(relay_in, relay_out).run());
        drop(target);

        let end = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(end.closed_first, Direction::Downstream);
        assert_eq!(end.bytes, 0);
        assert_eq!(end.error, None);

        // Seeker's read side reaches EOF once the session released it
        let mut seeker = seeker;
        let mut buf = Vec::new();
        seeker.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_reset_leg_ends_session_normally() {
        let (seeker, relay_in) = tokio::io::duplex(1024);

        let session = tokio::spawn(TunnelSession::new(relay_in, ResetLeg).run());

        let end = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(end.closed_first, Direction::Downstream);
        assert_eq!(end.bytes, 0);
        assert_eq!(end.error, Some(io::ErrorKind::ConnectionReset));

        // The healthy leg is still released
        let mut seeker = seeker;
        let mut buf = Vec::new();
        seeker.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }
}
