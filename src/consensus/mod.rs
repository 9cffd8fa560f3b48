//! Block agreement
//!
//! Two engines share one interface. The vote engine finalizes a leader's
//! block once enough participants approve it; the quorum engine runs a
//! pre-prepare / prepare / commit exchange among a fixed participant set.
//! Engines never touch the network: they return the messages to send and
//! the node hands them to the peer channel.

pub mod leader;
pub mod ledger;
pub mod quorum;
pub mod rollback;
pub mod vote;

pub use leader::LeaderSchedule;
pub use ledger::{Ledger, DEFAULT_MAX_ROLLBACK_DEPTH};
pub use quorum::{quorum_size, QuorumEngine};
pub use rollback::RollbackRecord;
pub use vote::{VoteEngine, VotePhase, VoteRules};

use crate::core::{Block, Role};
use crate::error::{LedgerError, Result};
use crate::network::PeerMessage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Decided block hashes an engine remembers before forgetting the oldest
pub const DECIDED_HISTORY: usize = 1024;

/// A message an engine wants delivered
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Broadcast(PeerMessage),
    Send { peer: String, message: PeerMessage },
    /// Broadcast with a hop count so peers re-broadcast it
    Gossip { message: PeerMessage, ttl: u32 },
}

/// Result of checking a block's agreement status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusOutcome {
    Finalized,
    Rejected,
    /// Not enough agreement yet
    Pending,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusKind {
    #[default]
    Vote,
    Quorum,
}

impl fmt::Display for ConsensusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusKind::Vote => write!(f, "vote"),
            ConsensusKind::Quorum => write!(f, "quorum"),
        }
    }
}

impl FromStr for ConsensusKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "vote" => Ok(ConsensusKind::Vote),
            "quorum" | "pbft" => Ok(ConsensusKind::Quorum),
            _ => Err(LedgerError::Config(format!(
                "Unknown consensus kind {s}, expected vote or quorum"
            ))),
        }
    }
}

/// Engine counters included in chain exports
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub kind: ConsensusKind,
    pub pending_blocks: usize,
    pub finalized_blocks: usize,
    pub rejected_blocks: usize,
    /// Quorum engine only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

/// What an engine may see and change while handling one event
pub struct EngineContext<'a> {
    pub node_id: &'a str,
    pub role: Role,
    /// Current round-robin leader
    pub leader: Option<Role>,
    pub ledger: &'a mut Ledger,
}

pub trait ConsensusEngine: Send {
    fn kind(&self) -> ConsensusKind;

    /// Whether this node should build the next block
    fn is_proposer(&self, ctx: &EngineContext<'_>) -> bool;

    /// Hash of the block currently being agreed on, if any
    fn in_flight(&self) -> Option<String>;

    /// Starts agreement on a block this node just built
    fn propose(&mut self, ctx: &mut EngineContext<'_>, block: Block) -> Result<Vec<Outbound>>;

    /// Handles an engine message from a peer. Messages for the other engine are ignored.
    fn on_message(
        &mut self,
        ctx: &mut EngineContext<'_>,
        peer: &str,
        message: PeerMessage,
    ) -> Result<Vec<Outbound>>;

    /// Abandons in-flight work after the proposer stopped making progress
    fn on_leader_failure(&mut self);

    fn stats(&self) -> EngineStats;
}
