use crate::core::Role;
use log::{error, info};
use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::sync::RwLock;

/// A live peer connection, addressed by the peer's node id
#[derive(Clone)]
pub struct Peer {
    node_id: String,
    addr: String,
    role: Option<Role>,
    // frames queued here are written by the connection's writer thread
    outbox: Sender<Vec<u8>>,
}

impl Peer {
    pub fn new(node_id: &str, addr: &str, role: Option<Role>, outbox: Sender<Vec<u8>>) -> Peer {
        Peer {
            node_id: node_id.to_string(),
            addr: addr.to_string(),
            role,
            outbox,
        }
    }

    pub fn get_node_id(&self) -> &str {
        self.node_id.as_str()
    }

    pub fn get_addr(&self) -> &str {
        self.addr.as_str()
    }

    pub fn get_role(&self) -> Option<Role> {
        self.role
    }

    /// Queues a frame; false when the writer thread has gone away
    pub fn push(&self, frame: Vec<u8>) -> bool {
        self.outbox.send(frame).is_ok()
    }
}

/// Registry of live peers
pub struct Peers {
    inner: RwLock<HashMap<String, Peer>>,
}

impl Default for Peers {
    fn default() -> Self {
        Self::new()
    }
}

impl Peers {
    pub fn new() -> Peers {
        Peers {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a peer; a newer connection for the same node id replaces the old one
    pub fn add_peer(&self, peer: Peer) {
        match self.inner.write() {
            Ok(mut inner) => {
                info!(
                    "Peer {} connected from {}",
                    peer.get_node_id(),
                    peer.get_addr()
                );
                inner.insert(peer.get_node_id().to_string(), peer);
            }
            Err(_) => error!("Failed to acquire write lock on peers"),
        }
    }

    pub fn evict_peer(&self, node_id: &str) -> Option<Peer> {
        match self.inner.write() {
            Ok(mut inner) => {
                let removed = inner.remove(node_id);
                if removed.is_some() {
                    info!("Peer {node_id} evicted");
                }
                removed
            }
            Err(_) => {
                error!("Failed to acquire write lock on peers");
                None
            }
        }
    }

    /// Evicts `node_id` only while it is still served by the connection at `addr`.
    /// A closing connection must not drop a newer one that replaced it.
    pub fn evict_connection(&self, node_id: &str, addr: &str) -> bool {
        match self.inner.write() {
            Ok(mut inner) => {
                let current = inner.get(node_id).map(|peer| peer.get_addr() == addr);
                if current == Some(true) {
                    inner.remove(node_id);
                    info!("Peer {node_id} at {addr} disconnected");
                    return true;
                }
                false
            }
            Err(_) => {
                error!("Failed to acquire write lock on peers");
                false
            }
        }
    }

    pub fn get_peer(&self, node_id: &str) -> Option<Peer> {
        match self.inner.read() {
            Ok(inner) => inner.get(node_id).cloned(),
            Err(_) => {
                error!("Failed to acquire read lock on peers");
                None
            }
        }
    }

    pub fn get_peers(&self) -> Vec<Peer> {
        match self.inner.read() {
            Ok(inner) => inner.values().cloned().collect(),
            Err(_) => {
                error!("Failed to acquire read lock on peers");
                Vec::new()
            }
        }
    }

    pub fn peer_is_known(&self, node_id: &str) -> bool {
        match self.inner.read() {
            Ok(inner) => inner.contains_key(node_id),
            Err(_) => {
                error!("Failed to acquire read lock on peers");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_add_replace_evict() {
        let peers = Peers::new();
        let (tx1, _rx1) = mpsc::channel();
        let (tx2, rx2) = mpsc::channel();

        peers.add_peer(Peer::new("node_a", "127.0.0.1:1", Some(Role::Ngo), tx1));
        peers.add_peer(Peer::new("node_a", "127.0.0.1:2", Some(Role::Ngo), tx2));
        assert_eq!(peers.len(), 1);
        assert_eq!(peers.get_peer("node_a").unwrap().get_addr(), "127.0.0.1:2");

        assert!(peers.get_peer("node_a").unwrap().push(b"x".to_vec()));
        assert_eq!(rx2.recv().unwrap(), b"x".to_vec());

        assert!(peers.evict_peer("node_a").is_some());
        assert!(peers.is_empty());
        assert!(!peers.peer_is_known("node_a"));
    }

    #[test]
    fn test_evict_connection_keeps_replacement() {
        let peers = Peers::new();
        let (tx1, _rx1) = mpsc::channel();
        let (tx2, _rx2) = mpsc::channel();
        peers.add_peer(Peer::new("node_a", "127.0.0.1:1", None, tx1));
        peers.add_peer(Peer::new("node_a", "127.0.0.1:2", None, tx2));

        assert!(!peers.evict_connection("node_a", "127.0.0.1:1"));
        assert!(peers.peer_is_known("node_a"));
        assert!(peers.evict_connection("node_a", "127.0.0.1:2"));
        assert!(peers.is_empty());
    }

    #[test]
    fn test_push_fails_when_writer_is_gone() {
        let (tx, rx) = mpsc::channel();
        let peer = Peer::new("node_b", "127.0.0.1:3", None, tx);
        drop(rx);
        assert!(!peer.push(b"frame".to_vec()));
    }
}
