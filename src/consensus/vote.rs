// Vote-threshold agreement
// The leader proposes a block and approves it; every other node validates the
// block against its own chain and votes. A node appends the block once enough
// approvals arrive, or drops it once rejections outweigh approvals.

use crate::consensus::{
    ConsensusEngine, ConsensusKind, ConsensusOutcome, EngineContext, EngineStats, Outbound,
    DECIDED_HISTORY,
};
use crate::core::Block;
use crate::error::Result;
use crate::network::{BlockProposal, PeerMessage, VoteChoice, VoteMessage};
use crate::utils::{current_timestamp, RecentSet};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};

pub const DEFAULT_CONSENSUS_THRESHOLD: f64 = 0.6;
pub const DEFAULT_MIN_VOTES: usize = 3;

/// Per-block progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VotePhase {
    Idle,
    LeaderProposed,
    Voting,
    Finalized,
    Rejected,
}

/// Approval threshold and the vote count below which nothing is decided
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoteRules {
    pub threshold: f64,
    pub min_votes: usize,
}

impl Default for VoteRules {
    fn default() -> Self {
        VoteRules {
            threshold: DEFAULT_CONSENSUS_THRESHOLD,
            min_votes: DEFAULT_MIN_VOTES,
        }
    }
}

impl VoteRules {
    pub fn evaluate(&self, approvals: usize, rejections: usize) -> ConsensusOutcome {
        let total = approvals + rejections;
        if total < self.min_votes {
            return ConsensusOutcome::Pending;
        }
        let approval_rate = approvals as f64 / total as f64;
        if approval_rate >= self.threshold {
            ConsensusOutcome::Finalized
        } else if rejections > approvals {
            ConsensusOutcome::Rejected
        } else {
            ConsensusOutcome::Pending
        }
    }
}

struct VoteRound {
    block: Option<Block>,
    // one live vote per voter; a later vote replaces the earlier one
    votes: BTreeMap<String, VoteMessage>,
    phase: VotePhase,
}

impl VoteRound {
    fn new(phase: VotePhase) -> VoteRound {
        VoteRound {
            block: None,
            votes: BTreeMap::new(),
            phase,
        }
    }

    fn tally(&self) -> (usize, usize) {
        let approvals = self
            .votes
            .values()
            .filter(|vote| vote.vote == VoteChoice::Approve)
            .count();
        (approvals, self.votes.len() - approvals)
    }
}

pub struct VoteEngine {
    rules: VoteRules,
    rounds: HashMap<String, VoteRound>,
    decided: RecentSet<VotePhase>,
    own_proposal: Option<String>,
    finalized_blocks: usize,
    rejected_blocks: usize,
}

impl Default for VoteEngine {
    fn default() -> Self {
        Self::new(VoteRules::default())
    }
}

impl VoteEngine {
    pub fn new(rules: VoteRules) -> VoteEngine {
        VoteEngine {
            rules,
            rounds: HashMap::new(),
            decided: RecentSet::new(DECIDED_HISTORY),
            own_proposal: None,
            finalized_blocks: 0,
            rejected_blocks: 0,
        }
    }

    pub fn phase(&self, block_hash: &str) -> VotePhase {
        if let Some(phase) = self.decided.get(block_hash) {
            return *phase;
        }
        self.rounds
            .get(block_hash)
            .map(|round| round.phase)
            .unwrap_or(VotePhase::Idle)
    }

    /// Current (approvals, rejections) for an undecided block
    pub fn tally(&self, block_hash: &str) -> (usize, usize) {
        self.rounds
            .get(block_hash)
            .map(|round| round.tally())
            .unwrap_or((0, 0))
    }

    /// Records a vote. Returns false when the block is already decided.
    pub fn cast_vote(&mut self, vote: VoteMessage) -> bool {
        if self.decided.contains(&vote.block_hash) {
            debug!(
                "Ignoring late vote from {} for decided block {}",
                vote.voter, vote.block_hash
            );
            return false;
        }
        let round = self
            .rounds
            .entry(vote.block_hash.clone())
            .or_insert_with(|| VoteRound::new(VotePhase::Voting));
        round.phase = VotePhase::Voting;
        debug!(
            "Recorded {:?} vote from {} for block {}",
            vote.vote, vote.voter, vote.block_hash
        );
        round.votes.insert(vote.voter.clone(), vote);
        true
    }

    fn own_vote(
        &mut self,
        ctx: &EngineContext<'_>,
        block_hash: &str,
        choice: VoteChoice,
        reason: &str,
    ) -> Result<Option<Outbound>> {
        let vote = VoteMessage {
            block_hash: block_hash.to_string(),
            vote: choice,
            reason: reason.to_string(),
            voter: ctx.node_id.to_string(),
            timestamp: current_timestamp()?,
        };
        if !self.cast_vote(vote.clone()) {
            return Ok(None);
        }
        info!("Cast {choice:?} vote for block {block_hash}");
        Ok(Some(Outbound::Broadcast(PeerMessage::ConsensusVote(vote))))
    }

    /// Finalizes or rejects the block when its votes allow it
    pub fn check_consensus(
        &mut self,
        ctx: &mut EngineContext<'_>,
        block_hash: &str,
    ) -> (ConsensusOutcome, Vec<Outbound>) {
        match self.decided.get(block_hash) {
            Some(VotePhase::Finalized) => return (ConsensusOutcome::Finalized, Vec::new()),
            Some(VotePhase::Rejected) => return (ConsensusOutcome::Rejected, Vec::new()),
            _ => {}
        }
        let round = match self.rounds.get(block_hash) {
            Some(round) => round,
            None => return (ConsensusOutcome::Pending, Vec::new()),
        };

        let (approvals, rejections) = round.tally();
        let outcome = self.rules.evaluate(approvals, rejections);
        debug!(
            "Consensus check for block {block_hash}: {approvals} approve, {rejections} reject"
        );

        match outcome {
            ConsensusOutcome::Pending => (ConsensusOutcome::Pending, Vec::new()),
            ConsensusOutcome::Finalized => {
                // votes can outrun the proposal itself
                let block = match &round.block {
                    Some(block) => block.clone(),
                    None => return (ConsensusOutcome::Pending, Vec::new()),
                };
                match ctx.ledger.finalize_block(block.clone()) {
                    Ok(_) => {
                        info!("Consensus reached for block {block_hash}, added to ledger");
                        self.decide(block_hash, VotePhase::Finalized);
                        let mut outbound = Vec::new();
                        if self.own_proposal.as_deref() == Some(block_hash) {
                            outbound.push(Outbound::Broadcast(PeerMessage::NewBlock(block)));
                        }
                        (ConsensusOutcome::Finalized, outbound)
                    }
                    Err(e) => {
                        warn!("Approved block {block_hash} no longer fits the chain: {e}");
                        self.decide(block_hash, VotePhase::Rejected);
                        (ConsensusOutcome::Rejected, Vec::new())
                    }
                }
            }
            ConsensusOutcome::Rejected => {
                info!("Consensus to reject block {block_hash}");
                self.decide(block_hash, VotePhase::Rejected);
                (ConsensusOutcome::Rejected, Vec::new())
            }
        }
    }

    fn decide(&mut self, block_hash: &str, phase: VotePhase) {
        self.rounds.remove(block_hash);
        self.decided.insert(block_hash.to_string(), phase);
        match phase {
            VotePhase::Finalized => self.finalized_blocks += 1,
            VotePhase::Rejected => self.rejected_blocks += 1,
            _ => {}
        }
        if self.own_proposal.as_deref() == Some(block_hash) {
            self.own_proposal = None;
        }
    }

    fn on_proposal(
        &mut self,
        ctx: &mut EngineContext<'_>,
        proposal: BlockProposal,
    ) -> Result<Vec<Outbound>> {
        let block = proposal.block;
        let block_hash = block.get_hash().to_string();
        if self.decided.contains(&block_hash) {
            return Ok(Vec::new());
        }
        info!(
            "Received block {} for voting from {}",
            block.get_index(),
            proposal.sender
        );

        let checked = ctx
            .ledger
            .chain()
            .check_block(&block)
            .and_then(|()| ctx.ledger.check_rules(&block));
        let (choice, reason) = match checked {
            Ok(()) => (VoteChoice::Approve, "Block validation passed".to_string()),
            Err(e) => (VoteChoice::Reject, format!("Block validation failed: {e}")),
        };

        let round = self
            .rounds
            .entry(block_hash.clone())
            .or_insert_with(|| VoteRound::new(VotePhase::LeaderProposed));
        if choice == VoteChoice::Approve {
            round.block = Some(block);
        }

        let mut outbound = Vec::new();
        outbound.extend(self.own_vote(ctx, &block_hash, choice, &reason)?);
        let (_, more) = self.check_consensus(ctx, &block_hash);
        outbound.extend(more);
        Ok(outbound)
    }
}

impl ConsensusEngine for VoteEngine {
    fn kind(&self) -> ConsensusKind {
        ConsensusKind::Vote
    }

    fn is_proposer(&self, ctx: &EngineContext<'_>) -> bool {
        ctx.leader == Some(ctx.role)
    }

    fn in_flight(&self) -> Option<String> {
        self.own_proposal.clone()
    }

    fn propose(&mut self, ctx: &mut EngineContext<'_>, block: Block) -> Result<Vec<Outbound>> {
        let block_hash = block.get_hash().to_string();
        info!(
            "Proposing block {} with {} transactions",
            block.get_index(),
            block.get_transactions().len()
        );

        let mut round = VoteRound::new(VotePhase::LeaderProposed);
        round.block = Some(block.clone());
        self.rounds.insert(block_hash.clone(), round);
        self.own_proposal = Some(block_hash.clone());

        let mut outbound = vec![Outbound::Broadcast(PeerMessage::BlockPropagation(
            BlockProposal {
                block,
                sender: ctx.node_id.to_string(),
                timestamp: current_timestamp()?,
            },
        ))];
        outbound.extend(self.own_vote(ctx, &block_hash, VoteChoice::Approve, "Leader proposal")?);
        let (_, more) = self.check_consensus(ctx, &block_hash);
        outbound.extend(more);
        Ok(outbound)
    }

    fn on_message(
        &mut self,
        ctx: &mut EngineContext<'_>,
        peer: &str,
        message: PeerMessage,
    ) -> Result<Vec<Outbound>> {
        match message {
            PeerMessage::BlockPropagation(proposal) => self.on_proposal(ctx, proposal),
            PeerMessage::ConsensusVote(vote) => {
                if vote.voter != peer {
                    warn!(
                        "Dropping vote on {} from {peer} claiming to be {}",
                        vote.block_hash, vote.voter
                    );
                    return Ok(Vec::new());
                }
                let block_hash = vote.block_hash.clone();
                if !self.cast_vote(vote) {
                    return Ok(Vec::new());
                }
                let (_, outbound) = self.check_consensus(ctx, &block_hash);
                Ok(outbound)
            }
            other => {
                debug!("Vote engine ignores {} from {peer}", other.kind());
                Ok(Vec::new())
            }
        }
    }

    fn on_leader_failure(&mut self) {
        if let Some(hash) = self.own_proposal.take() {
            warn!("Abandoning stalled proposal {hash}");
        }
        self.rounds.clear();
    }

    fn stats(&self) -> EngineStats {
        EngineStats {
            kind: ConsensusKind::Vote,
            pending_blocks: self.rounds.len(),
            finalized_blocks: self.finalized_blocks,
            rejected_blocks: self.rejected_blocks,
            view: None,
            sequence: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::Ledger;
    use crate::core::{Action, Role, Transaction, TxPayload};
    use crate::storage::MemoryPool;
    use serde_json::json;

    fn vote(hash: &str, voter: &str, choice: VoteChoice) -> VoteMessage {
        VoteMessage {
            block_hash: hash.to_string(),
            vote: choice,
            reason: String::new(),
            voter: voter.to_string(),
            timestamp: 0,
        }
    }

    fn block_for(ledger: &Ledger) -> Block {
        let mut tx = Transaction::new(
            "NGO_A",
            "Registry",
            1,
            Action::OpenCase,
            "case-1",
            TxPayload::with_record(json!({"name": "child"})),
        )
        .unwrap();
        tx.sign().unwrap();
        let mut block = Block::new_block(
            ledger.chain().len() as u64,
            vec![tx],
            ledger.chain().get_tip_hash(),
            Role::Ngo,
        )
        .unwrap();
        block.sign("node_leader");
        block
    }

    #[test]
    fn test_threshold_cases() {
        let rules = VoteRules::default();
        assert_eq!(rules.evaluate(3, 2), ConsensusOutcome::Finalized);
        assert_eq!(rules.evaluate(2, 3), ConsensusOutcome::Rejected);
        assert_eq!(rules.evaluate(1, 0), ConsensusOutcome::Pending);
        assert_eq!(rules.evaluate(3, 0), ConsensusOutcome::Finalized);
        assert_eq!(rules.evaluate(1, 1), ConsensusOutcome::Pending);
        // 0.5 approval with no rejection majority stays pending
        assert_eq!(rules.evaluate(2, 2), ConsensusOutcome::Pending);
    }

    #[test]
    fn test_later_vote_replaces_earlier() {
        let mut engine = VoteEngine::default();
        engine.cast_vote(vote("h", "n1", VoteChoice::Reject));
        engine.cast_vote(vote("h", "n1", VoteChoice::Approve));
        assert_eq!(engine.tally("h"), (1, 0));
        assert_eq!(engine.phase("h"), VotePhase::Voting);
    }

    #[test]
    fn test_proposal_finalizes_after_enough_approvals() {
        let mut ledger = Ledger::new(MemoryPool::new(10), 10);
        let block = block_for(&ledger);
        let hash = block.get_hash().to_string();
        let mut engine = VoteEngine::default();

        let mut ctx = EngineContext {
            node_id: "node_leader",
            role: Role::Ngo,
            leader: Some(Role::Ngo),
            ledger: &mut ledger,
        };
        assert!(engine.is_proposer(&ctx));
        let out = engine.propose(&mut ctx, block).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(engine.phase(&hash), VotePhase::Voting);
        assert_eq!(engine.in_flight(), Some(hash.clone()));

        for voter in ["n2", "n3"] {
            engine
                .on_message(
                    &mut ctx,
                    voter,
                    PeerMessage::ConsensusVote(vote(&hash, voter, VoteChoice::Approve)),
                )
                .unwrap();
        }
        assert_eq!(engine.phase(&hash), VotePhase::Finalized);
        assert_eq!(engine.in_flight(), None);
        assert_eq!(ctx.ledger.chain().len(), 1);

        // late votes are no-ops
        let out = engine
            .on_message(
                &mut ctx,
                "n4",
                PeerMessage::ConsensusVote(vote(&hash, "n4", VoteChoice::Reject)),
            )
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(engine.stats().finalized_blocks, 1);
    }

    #[test]
    fn test_replica_rejects_invalid_proposal() {
        let mut ledger = Ledger::new(MemoryPool::new(10), 10);
        let mut block = block_for(&ledger);
        block.tamper_index(4);
        let hash = block.get_hash().to_string();
        let mut engine = VoteEngine::default();
        let mut ctx = EngineContext {
            node_id: "node_b",
            role: Role::Government,
            leader: Some(Role::Ngo),
            ledger: &mut ledger,
        };
        assert!(!engine.is_proposer(&ctx));

        let out = engine
            .on_message(
                &mut ctx,
                "node_leader",
                PeerMessage::BlockPropagation(BlockProposal {
                    block,
                    sender: "node_leader".to_string(),
                    timestamp: 0,
                }),
            )
            .unwrap();
        match &out[0] {
            Outbound::Broadcast(PeerMessage::ConsensusVote(v)) => {
                assert_eq!(v.vote, VoteChoice::Reject)
            }
            other => panic!("unexpected {other:?}"),
        }

        for voter in ["n3", "n4"] {
            engine.cast_vote(vote(&hash, voter, VoteChoice::Reject));
        }
        let (outcome, _) = engine.check_consensus(&mut ctx, &hash);
        assert_eq!(outcome, ConsensusOutcome::Rejected);
        assert!(ctx.ledger.chain().is_empty());
    }

    #[test]
    fn test_votes_before_block_wait_for_it() {
        let mut ledger = Ledger::new(MemoryPool::new(10), 10);
        let block = block_for(&ledger);
        let hash = block.get_hash().to_string();
        let mut engine = VoteEngine::default();
        let mut ctx = EngineContext {
            node_id: "node_c",
            role: Role::Hospital,
            leader: Some(Role::Ngo),
            ledger: &mut ledger,
        };

        for voter in ["n1", "n2", "n3"] {
            engine
                .on_message(
                    &mut ctx,
                    voter,
                    PeerMessage::ConsensusVote(vote(&hash, voter, VoteChoice::Approve)),
                )
                .unwrap();
        }
        assert_eq!(engine.phase(&hash), VotePhase::Voting);

        engine
            .on_message(
                &mut ctx,
                "n1",
                PeerMessage::BlockPropagation(BlockProposal {
                    block,
                    sender: "n1".to_string(),
                    timestamp: 0,
                }),
            )
            .unwrap();
        assert_eq!(engine.phase(&hash), VotePhase::Finalized);
        assert_eq!(ctx.ledger.chain().len(), 1);
    }

    #[test]
    fn test_vote_counts_only_for_sending_peer() {
        let mut ledger = Ledger::new(MemoryPool::new(10), 10);
        let block = block_for(&ledger);
        let hash = block.get_hash().to_string();
        let mut engine = VoteEngine::default();
        let mut ctx = EngineContext {
            node_id: "node_leader",
            role: Role::Ngo,
            leader: Some(Role::Ngo),
            ledger: &mut ledger,
        };
        engine.propose(&mut ctx, block).unwrap();

        // one connection speaking for two other voters
        for voter in ["n2", "n3"] {
            let out = engine
                .on_message(
                    &mut ctx,
                    "n4",
                    PeerMessage::ConsensusVote(vote(&hash, voter, VoteChoice::Approve)),
                )
                .unwrap();
            assert!(out.is_empty());
        }
        assert_eq!(engine.tally(&hash), (1, 0));
        assert_eq!(engine.phase(&hash), VotePhase::Voting);
        assert!(ctx.ledger.chain().is_empty());
    }

    #[test]
    fn test_replica_rejects_unauthorized_transaction() {
        let mut ledger = Ledger::new(MemoryPool::new(10), 10);
        let mut tx = Transaction::new(
            "Hospital_C",
            "Registry",
            1,
            Action::ValidateCase,
            "case-1",
            TxPayload::with_decision("APPROVE"),
        )
        .unwrap();
        tx.sign().unwrap();
        let mut block = Block::new_block(0, vec![tx], "0", Role::Hospital).unwrap();
        block.sign("node_leader");
        let mut engine = VoteEngine::default();
        let mut ctx = EngineContext {
            node_id: "node_b",
            role: Role::Government,
            leader: Some(Role::Hospital),
            ledger: &mut ledger,
        };

        let out = engine
            .on_message(
                &mut ctx,
                "node_leader",
                PeerMessage::BlockPropagation(BlockProposal {
                    block,
                    sender: "node_leader".to_string(),
                    timestamp: 0,
                }),
            )
            .unwrap();
        match &out[0] {
            Outbound::Broadcast(PeerMessage::ConsensusVote(v)) => {
                assert_eq!(v.vote, VoteChoice::Reject);
                assert!(v.reason.contains("cannot perform"), "{}", v.reason);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decided_history_is_bounded() {
        let mut engine = VoteEngine::default();
        for i in 0..DECIDED_HISTORY + 10 {
            engine.decide(&format!("h{i}"), VotePhase::Finalized);
        }
        assert_eq!(engine.decided.len(), DECIDED_HISTORY);
        assert_eq!(engine.phase("h0"), VotePhase::Idle);
        assert_eq!(
            engine.phase(&format!("h{}", DECIDED_HISTORY + 9)),
            VotePhase::Finalized
        );
        assert_eq!(engine.stats().finalized_blocks, DECIDED_HISTORY + 10);
    }
}
