//! Peer wire messages
//!
//! Every frame on a peer connection is one JSON object `{"type": ..., "data": ...}`
//! followed by a newline.

use crate::core::{Block, Role, Transaction};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Hop count given to freshly gossiped messages
pub const DEFAULT_GOSSIP_TTL: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PeerMessage {
    Hello(Hello),
    NewTransaction(Transaction),
    /// A block that has already been finalized by the sender
    NewBlock(Block),
    /// A leader's proposal, put to a vote
    BlockPropagation(BlockProposal),
    ConsensusVote(VoteMessage),
    RollbackNotification(RollbackNotice),
    SyncRequest(SyncRequest),
    SyncResponse(SyncResponse),
    BlockRequest(BlockRequest),
    BlockResponse(BlockResponse),
    Preprepare(Preprepare),
    Prepare(PhaseVote),
    Commit(PhaseVote),
    Gossip(GossipEnvelope),
}

/// Message discriminant used to key handler tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Hello,
    NewTransaction,
    NewBlock,
    BlockPropagation,
    ConsensusVote,
    RollbackNotification,
    SyncRequest,
    SyncResponse,
    BlockRequest,
    BlockResponse,
    Preprepare,
    Prepare,
    Commit,
    Gossip,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Hello => "hello",
            MessageKind::NewTransaction => "new_transaction",
            MessageKind::NewBlock => "new_block",
            MessageKind::BlockPropagation => "block_propagation",
            MessageKind::ConsensusVote => "consensus_vote",
            MessageKind::RollbackNotification => "rollback_notification",
            MessageKind::SyncRequest => "sync_request",
            MessageKind::SyncResponse => "sync_response",
            MessageKind::BlockRequest => "block_request",
            MessageKind::BlockResponse => "block_response",
            MessageKind::Preprepare => "preprepare",
            MessageKind::Prepare => "prepare",
            MessageKind::Commit => "commit",
            MessageKind::Gossip => "gossip",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PeerMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            PeerMessage::Hello(_) => MessageKind::Hello,
            PeerMessage::NewTransaction(_) => MessageKind::NewTransaction,
            PeerMessage::NewBlock(_) => MessageKind::NewBlock,
            PeerMessage::BlockPropagation(_) => MessageKind::BlockPropagation,
            PeerMessage::ConsensusVote(_) => MessageKind::ConsensusVote,
            PeerMessage::RollbackNotification(_) => MessageKind::RollbackNotification,
            PeerMessage::SyncRequest(_) => MessageKind::SyncRequest,
            PeerMessage::SyncResponse(_) => MessageKind::SyncResponse,
            PeerMessage::BlockRequest(_) => MessageKind::BlockRequest,
            PeerMessage::BlockResponse(_) => MessageKind::BlockResponse,
            PeerMessage::Preprepare(_) => MessageKind::Preprepare,
            PeerMessage::Prepare(_) => MessageKind::Prepare,
            PeerMessage::Commit(_) => MessageKind::Commit,
            PeerMessage::Gossip(_) => MessageKind::Gossip,
        }
    }
}

/// First frame on every peer connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub node_id: String,
    pub role: Role,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockProposal {
    pub block: Block,
    pub sender: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteChoice {
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteMessage {
    pub block_hash: String,
    pub vote: VoteChoice,
    #[serde(default)]
    pub reason: String,
    pub voter: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackNotice {
    pub invalid_block_hash: String,
    pub rollback_depth: usize,
    pub new_blockchain_length: usize,
    pub timestamp: i64,
    pub initiator: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub requester: String,
    pub chain_length: usize,
}

/// Carries the sender's whole chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub blockchain: Vec<Block>,
    pub sender: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRequest {
    pub block_index: u64,
    pub requester: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockResponse {
    pub block: Block,
    pub sender: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preprepare {
    pub view: u64,
    pub sequence: u64,
    pub block_hash: String,
    pub block: Block,
}

/// Body of both `prepare` and `commit`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseVote {
    pub view: u64,
    pub sequence: u64,
    pub block_hash: String,
    pub from: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GossipEnvelope {
    pub id: String,
    pub message: Box<PeerMessage>,
    /// Remaining hops; a copy with ttl 0 is delivered but not forwarded
    pub ttl: u32,
    pub sender: String,
}

impl GossipEnvelope {
    pub fn wrap(message: PeerMessage, ttl: u32, sender: &str) -> GossipEnvelope {
        GossipEnvelope {
            id: Uuid::new_v4().simple().to_string(),
            message: Box::new(message),
            ttl,
            sender: sender.to_string(),
        }
    }

    /// The copy to forward, or `None` once the hop count is spent
    pub fn forwarded(&self) -> Option<GossipEnvelope> {
        if self.ttl == 0 {
            return None;
        }
        Some(GossipEnvelope {
            id: self.id.clone(),
            message: self.message.clone(),
            ttl: self.ttl - 1,
            sender: self.sender.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{decode, encode_line};
    use serde_json::json;

    #[test]
    fn test_wire_shape_is_type_and_data() {
        let msg = PeerMessage::SyncRequest(SyncRequest {
            requester: "node_a".to_string(),
            chain_length: 3,
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "sync_request", "data": {"requester": "node_a", "chainLength": 3}})
        );
        assert_eq!(msg.kind().as_str(), "sync_request");
    }

    #[test]
    fn test_vote_frame_parses() {
        let line = br#"{"type":"consensus_vote","data":{"blockHash":"ab","vote":"reject","reason":"bad","voter":"n2","timestamp":5}}"#;
        let msg: PeerMessage = decode(line).unwrap();
        match msg {
            PeerMessage::ConsensusVote(vote) => {
                assert_eq!(vote.vote, VoteChoice::Reject);
                assert_eq!(vote.voter, "n2");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result: crate::error::Result<PeerMessage> =
            decode(br#"{"type":"launch_missiles","data":{}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_gossip_nests_and_counts_down() {
        let inner = PeerMessage::Prepare(PhaseVote {
            view: 0,
            sequence: 1,
            block_hash: "h".to_string(),
            from: "n1".to_string(),
        });
        let envelope = GossipEnvelope::wrap(inner.clone(), 1, "n1");
        let line = encode_line(&PeerMessage::Gossip(envelope.clone())).unwrap();
        let back: PeerMessage = decode(&line).unwrap();
        assert_eq!(back, PeerMessage::Gossip(envelope.clone()));

        let hop = envelope.forwarded().unwrap();
        assert_eq!(hop.ttl, 0);
        assert_eq!(hop.id, envelope.id);
        assert_eq!(*hop.message, inner);
        assert!(hop.forwarded().is_none());
    }
}
