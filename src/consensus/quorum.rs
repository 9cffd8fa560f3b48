// Three-phase quorum agreement
// The primary for the current view sends a pre-prepare carrying the block.
// Replicas that accept it broadcast a prepare; once a replica holds a quorum
// of prepares it broadcasts a commit, and once it holds a quorum of commits it
// appends the block. Messages from another view are dropped without a vote.

use crate::consensus::{
    ConsensusEngine, ConsensusKind, EngineContext, EngineStats, Outbound, DECIDED_HISTORY,
};
use crate::core::Block;
use crate::error::{LedgerError, Result};
use crate::network::{PeerMessage, PhaseVote, Preprepare};
use crate::utils::RecentSet;
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashMap};

/// Tolerated faulty participants for `n` known participants
pub fn fault_tolerance(n: usize) -> usize {
    n.saturating_sub(1) / 3
}

/// Matching acknowledgements needed to advance a phase: `2f + 1`
pub fn quorum_size(n: usize) -> usize {
    2 * fault_tolerance(n) + 1
}

#[derive(Default)]
struct QuorumRound {
    sequence: u64,
    block: Option<Block>,
    prepares: BTreeSet<String>,
    commits: BTreeSet<String>,
    /// The pre-prepare was accepted locally
    prepared: bool,
    commit_sent: bool,
}

pub struct QuorumEngine {
    node_id: String,
    participants: Vec<String>,
    view: u64,
    sequence: u64,
    rounds: HashMap<String, QuorumRound>,
    decided: RecentSet,
    own_proposal: Option<String>,
    finalized_blocks: usize,
    rejected_blocks: usize,
}

impl QuorumEngine {
    /// `participants` are node ids; this node is always counted.
    pub fn new(participants: Vec<String>, node_id: &str) -> QuorumEngine {
        let mut participants = participants;
        participants.push(node_id.to_string());
        participants.sort();
        participants.dedup();
        info!(
            "Quorum engine with {} participants, quorum {}",
            participants.len(),
            quorum_size(participants.len())
        );
        QuorumEngine {
            node_id: node_id.to_string(),
            participants,
            view: 0,
            sequence: 0,
            rounds: HashMap::new(),
            decided: RecentSet::new(DECIDED_HISTORY),
            own_proposal: None,
            finalized_blocks: 0,
            rejected_blocks: 0,
        }
    }

    pub fn participants(&self) -> &[String] {
        self.participants.as_slice()
    }

    pub fn quorum(&self) -> usize {
        quorum_size(self.participants.len())
    }

    pub fn view(&self) -> u64 {
        self.view
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Primary for the current view
    pub fn primary(&self) -> &str {
        let index = (self.view % self.participants.len() as u64) as usize;
        &self.participants[index]
    }

    pub fn is_primary(&self) -> bool {
        self.primary() == self.node_id
    }

    /// Moves to the next view and drops every undecided round
    pub fn advance_view(&mut self) {
        self.view += 1;
        self.rounds.clear();
        self.own_proposal = None;
        info!("Advanced to view {}, primary is {}", self.view, self.primary());
    }

    pub fn prepare_count(&self, block_hash: &str) -> usize {
        self.rounds
            .get(block_hash)
            .map(|round| round.prepares.len())
            .unwrap_or(0)
    }

    pub fn commit_count(&self, block_hash: &str) -> usize {
        self.rounds
            .get(block_hash)
            .map(|round| round.commits.len())
            .unwrap_or(0)
    }

    pub fn is_finalized(&self, block_hash: &str) -> bool {
        self.decided.contains(block_hash)
    }

    fn phase_vote(&self, block_hash: &str, sequence: u64) -> PhaseVote {
        PhaseVote {
            view: self.view,
            sequence,
            block_hash: block_hash.to_string(),
            from: self.node_id.clone(),
        }
    }

    fn accepts_vote(&self, peer: &str, vote: &PhaseVote) -> bool {
        if vote.from != peer {
            warn!(
                "Ignoring vote on {} from {peer} claiming to be {}",
                vote.block_hash, vote.from
            );
            return false;
        }
        if vote.view != self.view {
            debug!(
                "Ignoring stale vote for view {} (current {}) from {}",
                vote.view, self.view, vote.from
            );
            return false;
        }
        if !self.participants.contains(&vote.from) {
            warn!("Ignoring vote from non-participant {}", vote.from);
            return false;
        }
        !self.decided.contains(&vote.block_hash)
    }

    /// Rejects the block if any part fails: the carried hash, chain linkage
    /// or a single transaction's domain rules.
    fn validate_preprepare(ctx: &EngineContext<'_>, preprepare: &Preprepare) -> Result<()> {
        if preprepare.block.get_hash() != preprepare.block_hash {
            return Err(LedgerError::IntegrityMismatch(format!(
                "Pre-prepare names {} but carries block {}",
                preprepare.block_hash,
                preprepare.block.get_hash()
            )));
        }
        ctx.ledger.chain().check_block(&preprepare.block)?;
        ctx.ledger.check_rules(&preprepare.block)
    }

    /// Sends a commit or finalizes when the round's counts allow it
    fn advance(&mut self, ctx: &mut EngineContext<'_>, block_hash: &str) -> Vec<Outbound> {
        let quorum = self.quorum();
        let mut outbound = Vec::new();

        let round = match self.rounds.get_mut(block_hash) {
            Some(round) => round,
            None => return outbound,
        };

        if round.prepared && !round.commit_sent && round.prepares.len() >= quorum {
            round.commit_sent = true;
            round.commits.insert(self.node_id.clone());
            info!(
                "Prepare quorum ({}/{quorum}) for block {block_hash}, sending commit",
                round.prepares.len()
            );
            outbound.push(Outbound::Broadcast(PeerMessage::Commit(PhaseVote {
                view: self.view,
                sequence: round.sequence,
                block_hash: block_hash.to_string(),
                from: self.node_id.clone(),
            })));
        }

        if round.commits.len() < quorum {
            return outbound;
        }
        let block = match &round.block {
            Some(block) => block.clone(),
            None => return outbound,
        };

        self.rounds.remove(block_hash);
        self.decided.remember(block_hash);
        let own = self.own_proposal.as_deref() == Some(block_hash);
        if own {
            self.own_proposal = None;
        }

        match ctx.ledger.finalize_block(block.clone()) {
            Ok(_) => {
                self.finalized_blocks += 1;
                info!("Commit quorum reached, block {block_hash} finalized");
                if own {
                    outbound.push(Outbound::Broadcast(PeerMessage::NewBlock(block)));
                }
            }
            Err(e) => {
                self.rejected_blocks += 1;
                warn!("Committed block {block_hash} no longer fits the chain: {e}");
            }
        }
        outbound
    }

    fn on_preprepare(
        &mut self,
        ctx: &mut EngineContext<'_>,
        peer: &str,
        preprepare: Preprepare,
    ) -> Result<Vec<Outbound>> {
        if preprepare.view != self.view {
            debug!(
                "Ignoring pre-prepare for view {} (current {}) from {peer}",
                preprepare.view, self.view
            );
            return Ok(Vec::new());
        }
        if peer != self.primary() {
            warn!(
                "Ignoring pre-prepare from {peer}, primary for view {} is {}",
                self.view,
                self.primary()
            );
            return Ok(Vec::new());
        }
        if self.decided.contains(&preprepare.block_hash) {
            return Ok(Vec::new());
        }

        if let Err(e) = Self::validate_preprepare(ctx, &preprepare) {
            warn!(
                "Rejecting block {} from primary {peer}: {e}",
                preprepare.block_hash
            );
            self.rejected_blocks += 1;
            return Ok(Vec::new());
        }

        let block_hash = preprepare.block_hash.clone();
        self.sequence = self.sequence.max(preprepare.sequence);
        let primary = self.primary().to_string();
        let round = self.rounds.entry(block_hash.clone()).or_default();
        round.sequence = preprepare.sequence;
        round.block = Some(preprepare.block);
        round.prepared = true;
        round.prepares.insert(primary);
        round.prepares.insert(self.node_id.clone());
        debug!("Accepted pre-prepare for block {block_hash}, sending prepare");

        let mut outbound = vec![Outbound::Broadcast(PeerMessage::Prepare(
            self.phase_vote(&block_hash, preprepare.sequence),
        ))];
        outbound.extend(self.advance(ctx, &block_hash));
        Ok(outbound)
    }
}

impl ConsensusEngine for QuorumEngine {
    fn kind(&self) -> ConsensusKind {
        ConsensusKind::Quorum
    }

    fn is_proposer(&self, _ctx: &EngineContext<'_>) -> bool {
        self.is_primary()
    }

    fn in_flight(&self) -> Option<String> {
        if self.own_proposal.is_some() {
            return self.own_proposal.clone();
        }
        self.rounds
            .iter()
            .filter(|(_, round)| round.block.is_some())
            .map(|(hash, _)| hash.clone())
            .min()
    }

    fn propose(&mut self, ctx: &mut EngineContext<'_>, block: Block) -> Result<Vec<Outbound>> {
        if !self.is_primary() {
            return Err(LedgerError::Unauthorized(format!(
                "{} is not the primary for view {}",
                self.node_id, self.view
            )));
        }
        self.sequence += 1;
        let block_hash = block.get_hash().to_string();
        info!(
            "Pre-preparing block {} as sequence {} in view {}",
            block.get_index(),
            self.sequence,
            self.view
        );

        let round = self.rounds.entry(block_hash.clone()).or_default();
        round.sequence = self.sequence;
        round.block = Some(block.clone());
        round.prepared = true;
        round.prepares.insert(self.node_id.clone());
        self.own_proposal = Some(block_hash.clone());

        let mut outbound = vec![Outbound::Broadcast(PeerMessage::Preprepare(Preprepare {
            view: self.view,
            sequence: self.sequence,
            block_hash: block_hash.clone(),
            block,
        }))];
        outbound.extend(self.advance(ctx, &block_hash));
        Ok(outbound)
    }

    fn on_message(
        &mut self,
        ctx: &mut EngineContext<'_>,
        peer: &str,
        message: PeerMessage,
    ) -> Result<Vec<Outbound>> {
        match message {
            PeerMessage::Preprepare(preprepare) => self.on_preprepare(ctx, peer, preprepare),
            PeerMessage::Prepare(vote) => {
                if !self.accepts_vote(peer, &vote) {
                    return Ok(Vec::new());
                }
                let round = self.rounds.entry(vote.block_hash.clone()).or_default();
                round.prepares.insert(vote.from);
                Ok(self.advance(ctx, &vote.block_hash))
            }
            PeerMessage::Commit(vote) => {
                if !self.accepts_vote(peer, &vote) {
                    return Ok(Vec::new());
                }
                let round = self.rounds.entry(vote.block_hash.clone()).or_default();
                round.commits.insert(vote.from);
                Ok(self.advance(ctx, &vote.block_hash))
            }
            other => {
                debug!("Quorum engine ignores {} from {peer}", other.kind());
                Ok(Vec::new())
            }
        }
    }

    fn on_leader_failure(&mut self) {
        warn!("Primary {} stalled in view {}", self.primary(), self.view);
        self.advance_view();
    }

    fn stats(&self) -> EngineStats {
        EngineStats {
            kind: ConsensusKind::Quorum,
            pending_blocks: self.rounds.len(),
            finalized_blocks: self.finalized_blocks,
            rejected_blocks: self.rejected_blocks,
            view: Some(self.view),
            sequence: Some(self.sequence),
        }
    }
}
