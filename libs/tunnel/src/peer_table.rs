use std::net::Ipv4Addr;

use parking_lot::RwLock;

use crate::error::{Error, Result};

const MAX_PEERS: u16 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub id: String,
    pub index: u8,
    pub public_key: Option<String>,
    pub edge_ip: Ipv4Addr,
    pub client_ip: Ipv4Addr,
    pub state: PeerConnectionState,
}

impl PeerRecord {
    fn new(id: String, index: u8, public_key: Option<String>) -> Self {
        Self {
            id,
            edge_ip: index_to_edge_ip(index),
            client_ip: index_to_client_ip(index),
            index,
            public_key,
            state: PeerConnectionState::Connecting,
        }
    }
}

fn index_to_edge_ip(index: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, index, 1)
}

fn index_to_client_ip(index: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, index, 2)
}

/// In-memory table of live peers, keyed by the cloud-assigned peer id.
/// Indices are unique across live peers and drawn from `[0, 255)`; the
/// distilled source wraps back to `0` once all slots are in use, which
/// would collide with the first peer's addressing, so this implementation
/// reports [`Error::Exhausted`] instead (see `DESIGN.md`).
#[derive(Default)]
pub struct PeerTable {
    peers: RwLock<Vec<PeerRecord>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or re-registers) a peer by id, returning the resulting
    /// record. Re-registering an existing id preserves its `index`,
    /// `edge_ip`, and `client_ip` per the peer-registration algorithm; the
    /// caller is responsible for tearing down any existing WebRTC session
    /// for that id before the new one is negotiated.
    pub fn register(&self, id: String, public_key: Option<String>) -> Result<PeerRecord> {
        let mut peers = self.peers.write();

        if let Some(existing) = peers.iter_mut().find(|p| p.id == id) {
            existing.public_key = public_key.or_else(|| existing.public_key.clone());
            existing.state = PeerConnectionState::Connecting;
            return Ok(existing.clone());
        }

        let used: std::collections::HashSet<u8> = peers.iter().map(|p| p.index).collect();
        let index = (0..MAX_PEERS as u8)
            .find(|i| !used.contains(i))
            .ok_or_else(|| Error::Exhausted("peer index space exhausted (255 live peers)".into()))?;

        let record = PeerRecord::new(id, index, public_key);
        peers.push(record.clone());

        Ok(record)
    }

    pub fn set_state(&self, id: &str, state: PeerConnectionState) {
        if let Some(peer) = self.peers.write().iter_mut().find(|p| p.id == id) {
            peer.state = state;
        }
    }

    pub fn get(&self, id: &str) -> Option<PeerRecord> {
        self.peers.read().iter().find(|p| p.id == id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<PeerRecord> {
        let mut peers = self.peers.write();
        let position = peers.iter().position(|p| p.id == id)?;
        Some(peers.remove(position))
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_peer_gets_index_zero_and_derived_addresses() {
        let table = PeerTable::new();

        let peer = table.register("p1".into(), None).unwrap();

        assert_eq!(peer.index, 0);
        assert_eq!(peer.edge_ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(peer.client_ip, Ipv4Addr::new(10, 0, 0, 2));
    }

    #[test]
    fn reregistering_same_id_preserves_index() {
        let table = PeerTable::new();
        let first = table.register("p1".into(), None).unwrap();
        table.register("p2".into(), None).unwrap();

        let again = table.register("p1".into(), None).unwrap();

        assert_eq!(again.index, first.index);
        assert_eq!(again.edge_ip, first.edge_ip);
    }

    #[test]
    fn exhausts_after_255_live_peers() {
        let table = PeerTable::new();
        for i in 0..255 {
            table.register(format!("p{i}"), None).unwrap();
        }

        let result = table.register("overflow".into(), None);

        assert!(matches!(result, Err(Error::Exhausted(_))));
    }

    #[test]
    fn removing_a_peer_frees_its_index() {
        let table = PeerTable::new();
        let first = table.register("p1".into(), None).unwrap();
        table.remove("p1");

        let second = table.register("p2".into(), None).unwrap();

        assert_eq!(second.index, first.index);
    }
}
