//! Discovery announcement codec
//!
//! An announcement is a UTF-8 text datagram: a comma-separated list of
//! textual addresses, the sender's own address first, followed by every
//! peer the sender currently knows. There is no version or length prefix.

use crate::PeerAddr;

/// Token separator on the wire
pub const ANNOUNCEMENT_SEPARATOR: char = ',';

/// A decoded or to-be-sent discovery announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    /// The sender's own address
    pub origin: PeerAddr,
    /// Peers known to the sender at the time of sending
    pub peers: Vec<PeerAddr>,
}

impl Announcement {
    pub fn new(origin: PeerAddr, peers: Vec<PeerAddr>) -> Self {
        Self { origin, peers }
    }

    /// Origin followed by every listed peer
    pub fn addresses(&self) -> impl Iterator<Item = &PeerAddr> {
        std::iter::once(&self.origin).chain(self.peers.iter())
    }

    /// Encode as the comma-separated wire text
    pub fn encode(&self) -> String {
        let mut out = self.origin.to_string();
        for peer in &self.peers {
            out.push(ANNOUNCEMENT_SEPARATOR);
            out.push_str(&peer.to_string());
        }
        out
    }

    /// Encode to datagram bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode().into_bytes()
    }

    /// Split a received payload into trimmed, non-empty tokens.
    ///
    /// Invalid UTF-8 is replaced rather than rejected; the affected tokens
    /// then simply fail to resolve.
    pub fn tokens(payload: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(payload)
            .split(ANNOUNCEMENT_SEPARATOR)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Decode a payload made of literal addresses.
    ///
    /// Unparsable tokens are skipped; the first valid token is taken as the
    /// origin. Returns `None` when no token is a valid address. Host names
    /// are not looked up here, see [`PeerAddr::resolve`].
    pub fn decode(payload: &[u8]) -> Option<Self> {
        let mut addrs = Self::tokens(payload)
            .into_iter()
            .filter_map(|t| PeerAddr::parse(&t));
        let origin = addrs.next()?;
        Some(Self {
            origin,
            peers: addrs.collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::net::Ipv4Addr;

    fn addr(last: u8) -> PeerAddr {
        PeerAddr::from(Ipv4Addr::new(192, 168, 1, last))
    }

    #[test]
    fn test_encode_origin_first() {
        let ann = Announcement::new(addr(1), vec![addr(2), addr(3)]);
        assert_eq!(ann.encode(), "192.168.1.1,192.168.1.2,192.168.1.3");
    }

    #[test]
    fn test_encode_alone() {
        let ann = Announcement::new(addr(9), Vec::new());
        assert_eq!(ann.encode(), "192.168.1.9");
        assert_eq!(ann.to_bytes(), b"192.168.1.9".to_vec());
    }

    #[test]
    fn test_decode_reproduces_address_set() {
        let ann = Announcement::new(addr(1), vec![addr(4), addr(2), addr(3)]);
        let decoded = Announcement::decode(&ann.to_bytes()).unwrap();
        assert_eq!(decoded, ann);

        let sent: HashSet<_> = ann.addresses().copied().collect();
        let got: HashSet<_> = decoded.addresses().copied().collect();
        assert_eq!(sent, got);
    }

    #[test]
    fn test_tokens_trim_and_skip_empty() {
        let tokens = Announcement::tokens(b" 10.0.0.1 ,,10.0.0.2,\n");
        assert_eq!(tokens, vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]);
    }

    #[test]
    fn test_decode_skips_malformed() {
        let decoded = Announcement::decode(b"junk,10.0.0.1,also junk,10.0.0.2").unwrap();
        assert_eq!(decoded.origin, PeerAddr::parse("10.0.0.1").unwrap());
        assert_eq!(decoded.peers, vec![PeerAddr::parse("10.0.0.2").unwrap()]);
    }

    #[test]
    fn test_decode_nothing_valid() {
        assert!(Announcement::decode(b"").is_none());
        assert!(Announcement::decode(b"hello!,world!").is_none());
    }

    #[test]
    fn test_tokens_lossy_utf8() {
        let tokens = Announcement::tokens(&[0xff, b',', b'1', b'.', b'2', b'.', b'3', b'.', b'4']);
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1], "1.2.3.4");
    }
}
