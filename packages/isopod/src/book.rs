//! The address book.
//!
//! System-wide, in-memory only: peer locations are operational hints, not
//! state worth persisting. Local pods register their own nodes here on
//! spawn, so same-system pods can always reach each other.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::RwLock;

use isopod_transport::PeerId;

/// Known socket addresses per peer identity.
#[derive(Default)]
pub struct AddressBook {
    locs: RwLock<BTreeMap<PeerId, Vec<SocketAddr>>>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `peer` was seen at `addr`. Duplicates are ignored.
    pub fn add(&self, peer: PeerId, addr: SocketAddr) {
        let mut locs = self.locs.write().expect("address book poisoned");
        let addrs = locs.entry(peer).or_default();
        if !addrs.contains(&addr) {
            addrs.push(addr);
        }
    }

    /// Every known address for `peer`, most recently added last.
    pub fn where_is(&self, peer: &PeerId) -> Vec<SocketAddr> {
        self.locs
            .read()
            .expect("address book poisoned")
            .get(peer)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_dedups_and_preserves_order() {
        let book = AddressBook::new();
        let peer = PeerId([1; 32]);
        let a: SocketAddr = "127.0.0.1:1000".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:2000".parse().unwrap();
        book.add(peer, a);
        book.add(peer, b);
        book.add(peer, a);
        assert_eq!(book.where_is(&peer), vec![a, b]);
    }

    #[test]
    fn unknown_peer_has_no_addresses() {
        let book = AddressBook::new();
        assert!(book.where_is(&PeerId([9; 32])).is_empty());
    }
}
