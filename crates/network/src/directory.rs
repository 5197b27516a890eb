//! Peer directory: the set of peer addresses this node knows about.
//!
//! Written by the discovery listener, read by the broadcaster and the
//! connection manager. Entries are only ever added, never removed, so the
//! directory grows monotonically for the lifetime of the node.

use parking_lot::RwLock;

use ribbonworm_core::{Announcement, PeerAddr};

pub struct PeerDirectory {
    /// This node's own address, never stored as a peer
    local: PeerAddr,
    /// Known peers in discovery order, no duplicates
    peers: RwLock<Vec<PeerAddr>>,
}

impl PeerDirectory {
    pub fn new(local: PeerAddr) -> Self {
        Self {
            local,
            peers: RwLock::new(Vec::new()),
        }
    }

    /// This node's own address
    pub fn local_addr(&self) -> PeerAddr {
        self.local
    }

    /// Add a peer. Returns true if newly added.
    ///
    /// The local address and already-known peers are ignored. The check and
    /// the insert happen under one write lock.
    pub fn add(&self, addr: PeerAddr) -> bool {
        if addr == self.local {
            return false;
        }
        let mut peers = self.peers.write();
        if peers.contains(&addr) {
            return false;
        }
        peers.push(addr);
        true
    }

    /// Add several peers, returning the ones that were new
    pub fn extend<I: IntoIterator<Item = PeerAddr>>(&self, addrs: I) -> Vec<PeerAddr> {
        addrs.into_iter().filter(|a| self.add(*a)).collect()
    }

    pub fn contains(&self, addr: &PeerAddr) -> bool {
        self.peers.read().contains(addr)
    }

    /// Point-in-time copy of the known peers
    pub fn snapshot(&self) -> Vec<PeerAddr> {
        self.peers.read().clone()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Announcement listing this node first, then every known peer
    pub fn announcement(&self) -> Announcement {
        Announcement::new(self.local, self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn addr(last: u8) -> PeerAddr {
        PeerAddr::from(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn test_add_and_dedup() {
        let dir = PeerDirectory::new(addr(1));
        assert!(dir.add(addr(2)));
        assert!(!dir.add(addr(2)));
        assert_eq!(dir.len(), 1);
        assert!(dir.contains(&addr(2)));
    }

    #[test]
    fn test_self_excluded() {
        let dir = PeerDirectory::new(addr(1));
        assert!(!dir.add(addr(1)));
        assert!(dir.is_empty());
        assert!(!dir.contains(&addr(1)));
    }

    #[test]
    fn test_ipv4_mapped_forms_are_one_peer() {
        let dir = PeerDirectory::new(addr(1));
        assert!(dir.add(addr(2)));
        assert!(!dir.add("::ffff:10.0.0.2".parse().unwrap()));
        // Own address in mapped form is still self
        assert!(!dir.add("::ffff:10.0.0.1".parse().unwrap()));
        assert_eq!(dir.snapshot(), vec![addr(2)]);
    }

    #[test]
    fn test_extend_returns_new_only() {
        let dir = PeerDirectory::new(addr(1));
        dir.add(addr(3));
        let added = dir.extend(vec![addr(1), addr(2), addr(3), addr(2), addr(4)]);
        assert_eq!(added, vec![addr(2), addr(4)]);
        assert_eq!(dir.snapshot(), vec![addr(3), addr(2), addr(4)]);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let dir = PeerDirectory::new(addr(1));
        dir.add(addr(2));
        let snap = dir.snapshot();
        dir.add(addr(3));
        assert_eq!(snap, vec![addr(2)]);
        assert_eq!(dir.len(), 2);
    }

    #[test]
    fn test_announcement_local_first() {
        let dir = PeerDirectory::new(addr(1));
        dir.add(addr(5));
        dir.add(addr(4));
        assert_eq!(dir.announcement().encode(), "10.0.0.1,10.0.0.5,10.0.0.4");
    }

    #[test]
    fn test_concurrent_adds_insert_once() {
        let dir = Arc::new(PeerDirectory::new(addr(1)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dir = Arc::clone(&dir);
                std::thread::spawn(move || {
                    (2..=50u8).filter(|i| dir.add(addr(*i))).count()
                })
            })
            .collect();

        let total_new: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total_new, 49);
        assert_eq!(dir.len(), 49);
    }
}
