//! Broadcast, unicast and gossip over live peer connections
//!
//! Sends are fire-and-forget: a frame is handed to the connection's writer
//! thread and never waited on. A peer whose writer has gone away is evicted
//! and the send reports false.

use crate::error::{LedgerError, Result};
use crate::network::{GossipEnvelope, PeerMessage, Peers};
use crate::utils::encode_line;
use log::{debug, warn};
use serde::Serialize;
use std::io::Write;
use std::net::TcpStream;
use std::sync::mpsc::{self, Sender};
use std::thread;

pub trait PeerChannel: Send + Sync {
    /// Sends to every live peer, returning how many accepted the frame
    fn broadcast(&self, message: &PeerMessage) -> usize;

    /// Sends to one peer; false when it is not live
    fn send(&self, peer_id: &str, message: &PeerMessage) -> bool;

    fn peer_ids(&self) -> Vec<String>;

    /// Wraps `message` with a hop count and broadcasts it
    fn gossip(&self, message: PeerMessage, ttl: u32, sender: &str) -> usize {
        if ttl == 0 {
            return 0;
        }
        let envelope = GossipEnvelope::wrap(message, ttl - 1, sender);
        self.broadcast(&PeerMessage::Gossip(envelope))
    }
}

impl PeerChannel for Peers {
    fn broadcast(&self, message: &PeerMessage) -> usize {
        let frame = match encode_line(message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping {} broadcast: {e}", message.kind());
                return 0;
            }
        };

        let mut delivered = 0;
        for peer in self.get_peers() {
            if peer.push(frame.clone()) {
                delivered += 1;
            } else {
                self.evict_peer(peer.get_node_id());
            }
        }
        debug!("Broadcasted {} to {delivered} peers", message.kind());
        delivered
    }

    fn send(&self, peer_id: &str, message: &PeerMessage) -> bool {
        let peer = match self.get_peer(peer_id) {
            Some(peer) => peer,
            None => return false,
        };
        let frame = match encode_line(message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping {} for {peer_id}: {e}", message.kind());
                return false;
            }
        };
        if peer.push(frame) {
            true
        } else {
            self.evict_peer(peer_id);
            false
        }
    }

    fn peer_ids(&self) -> Vec<String> {
        self.get_peers()
            .iter()
            .map(|peer| peer.get_node_id().to_string())
            .collect()
    }
}

/// Spawns the writer thread for a connection and returns its frame queue.
///
/// The thread exits when the queue is dropped or a write fails.
pub fn spawn_writer(mut stream: TcpStream, label: String) -> Sender<Vec<u8>> {
    let (sender, receiver) = mpsc::channel::<Vec<u8>>();
    thread::spawn(move || {
        for frame in receiver {
            if let Err(e) = stream.write_all(&frame).and_then(|_| stream.flush()) {
                warn!("Write to {label} failed: {e}");
                break;
            }
        }
        debug!("Writer for {label} finished");
    });
    sender
}

/// Writes a single frame on a fresh stream, for one-shot clients
pub fn write_frame<T: Serialize>(stream: &mut TcpStream, frame: &T) -> Result<()> {
    let frame = encode_line(frame)?;
    stream
        .write_all(&frame)
        .and_then(|_| stream.flush())
        .map_err(|e| LedgerError::Network(format!("Failed to send data: {e}")))
}
