//! Relay request codec
//!
//! The first thing a relay-seeking peer sends on a relay connection is a
//! single newline-terminated line naming the ultimate target. Every byte
//! after the newline belongs to the tunnelled stream.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{CoreError, PeerAddr, Result};

/// Default cap on the request line, newline excluded
pub const MAX_REQUEST_LEN: usize = 256;

/// Target line sent once at the start of a relayed connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRequest {
    target: String,
}

impl RelayRequest {
    pub fn new(target: PeerAddr) -> Self {
        Self {
            target: target.to_string(),
        }
    }

    /// Build from a received line; line terminators and surrounding
    /// whitespace are dropped.
    pub fn from_line(line: &str) -> Self {
        Self {
            target: line.trim().to_string(),
        }
    }

    /// The textual target as sent
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Wire bytes: target followed by `\n`
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.target.len() + 1);
        out.extend_from_slice(self.target.as_bytes());
        out.push(b'\n');
        out
    }

    /// Resolve the named target
    pub async fn resolve(&self) -> Option<PeerAddr> {
        PeerAddr::resolve(&self.target).await
    }

    /// Write the request line and flush
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.encode()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one request line.
    ///
    /// Returns `Ok(None)` when the stream ends before any byte arrives. A
    /// final line without a newline is still accepted. Lines longer than
    /// `max_len` fail with [`CoreError::RequestTooLong`]. Only the line
    /// itself is consumed from `reader`.
    pub async fn read_from<R: AsyncBufRead + Unpin>(
        reader: &mut R,
        max_len: usize,
    ) -> Result<Option<Self>> {
        let mut line = String::new();
        let limit = (max_len as u64).saturating_add(1);
        let n = (&mut *reader).take(limit).read_line(&mut line).await?;

        if n == 0 {
            return Ok(None);
        }

        if !line.ends_with('\n') && n as u64 >= limit {
            return Err(CoreError::RequestTooLong { len: n, max: max_len });
        }

        Ok(Some(Self::from_line(&line)))
    }
}
