// Bounded rollback and longest-valid-chain resync
// A rollback cuts the chain at a named block and drops everything after it,
// but never deeper than the configured limit. A resync adopts a peer chain only
// when it is strictly longer and every block past the fork point checks out.

use crate::consensus::Ledger;
use crate::core::Block;
use crate::error::{LedgerError, Result};
use crate::network::RollbackNotice;
use crate::utils::current_timestamp;
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Audit entry for a rollback. Kept for inspection, never replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRecord {
    pub timestamp: i64,
    pub invalid_block_hash: String,
    pub rollback_depth: usize,
    pub blocks_removed: Vec<Block>,
}

impl Ledger {
    /// Removes the block with `block_hash` and every block after it.
    ///
    /// Returns `Ok(None)` and leaves the chain alone when the block is not held.
    pub fn rollback(&mut self, block_hash: &str) -> Result<Option<RollbackRecord>> {
        let index = match self.chain.find_block_index(block_hash) {
            Some(index) => index,
            None => {
                info!("Rollback skipped: block {block_hash} is not on the chain");
                return Ok(None);
            }
        };

        let depth = self.chain.len() - index;
        if depth > self.max_rollback_depth {
            warn!(
                "Refusing rollback of {block_hash}: depth {depth} exceeds {}",
                self.max_rollback_depth
            );
            return Err(LedgerError::RollbackDepthExceeded {
                depth,
                max_depth: self.max_rollback_depth,
            });
        }

        let removed = self.chain.truncate(index);
        self.state.rebuild_from_chain(self.chain.get_blocks());

        let record = RollbackRecord {
            timestamp: current_timestamp()?,
            invalid_block_hash: block_hash.to_string(),
            rollback_depth: depth,
            blocks_removed: removed,
        };
        self.rollback_history.push(record.clone());
        info!(
            "Rollback completed: removed {} blocks, chain length now {}",
            record.blocks_removed.len(),
            self.chain.len()
        );
        Ok(Some(record))
    }

    /// Applies a peer's rollback if this node holds the block and the cut is
    /// within its own depth limit. Returns true when the chain was truncated.
    pub fn apply_rollback_notice(&mut self, notice: &RollbackNotice) -> Result<bool> {
        if !self.chain.block_exists(&notice.invalid_block_hash) {
            info!(
                "Ignoring rollback notification from {}: block {} not held",
                notice.initiator, notice.invalid_block_hash
            );
            return Ok(false);
        }
        match self.rollback(&notice.invalid_block_hash) {
            Ok(record) => Ok(record.is_some()),
            Err(LedgerError::RollbackDepthExceeded { depth, max_depth }) => {
                warn!(
                    "Ignoring rollback notification from {}: depth {depth} exceeds {max_depth}",
                    notice.initiator
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Adopts `peer_blocks` when strictly longer, valid block by block and
    /// every transaction passes the domain rules.
    pub fn sync_with_peer(&mut self, peer_blocks: &[Block]) -> Result<bool> {
        let candidate = match self.chain.candidate_from_peer(peer_blocks) {
            Ok(Some(candidate)) => candidate,
            Ok(None) => return Ok(false),
            Err(e) => {
                warn!("Peer chain validation failed: {e}");
                return Ok(false);
            }
        };
        if let Err(e) = candidate
            .get_blocks()
            .iter()
            .try_for_each(|block| self.check_rules(block))
        {
            warn!("Peer chain breaks the domain rules: {e}");
            return Ok(false);
        }

        info!(
            "Synchronizing blockchain with peer: peer has {} blocks, we have {}",
            candidate.len(),
            self.chain.len()
        );
        self.chain = candidate;
        self.state.rebuild_from_chain(self.chain.get_blocks());
        self.evict_committed();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Action, Role, Transaction, TxPayload};
    use crate::storage::MemoryPool;
    use serde_json::json;

    fn ledger_with(len: usize, max_depth: usize) -> Ledger {
        let mut ledger = Ledger::new(MemoryPool::new(100), max_depth);
        extend(&mut ledger, len, "case");
        ledger
    }

    fn extend(ledger: &mut Ledger, count: usize, prefix: &str) {
        for i in 0..count {
            let mut tx = Transaction::new(
                "NGO_A",
                "Registry",
                1,
                Action::OpenCase,
                &format!("{prefix}-{i}"),
                TxPayload::with_record(json!({"n": i})),
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
            block.sign("node_a");
            ledger.finalize_block(block).unwrap();
        }
    }

    #[test]
    fn test_rollback_within_depth() {
        let mut ledger = ledger_with(12, 10);
        let hash = ledger.chain().get_blocks()[5].get_hash().to_string();

        let record = ledger.rollback(&hash).unwrap().unwrap();
        assert_eq!(record.rollback_depth, 7);
        assert_eq!(record.blocks_removed.len(), 7);
        assert_eq!(ledger.chain().len(), 5);
        assert_eq!(ledger.rollback_history().len(), 1);
        assert!(ledger.state().get("case-4").is_some());
        assert!(ledger.state().get("case-5").is_none());
    }

    #[test]
    fn test_rollback_too_deep_leaves_chain() {
        let mut ledger = ledger_with(12, 6);
        let hash = ledger.chain().get_blocks()[5].get_hash().to_string();

        assert_eq!(
            ledger.rollback(&hash),
            Err(LedgerError::RollbackDepthExceeded {
                depth: 7,
                max_depth: 6
            })
        );
        assert_eq!(ledger.chain().len(), 12);
        assert!(ledger.rollback_history().is_empty());
    }

    #[test]
    fn test_rollback_unknown_hash_is_noop() {
        let mut ledger = ledger_with(2, 10);
        assert_eq!(ledger.rollback("missing"), Ok(None));
        assert_eq!(ledger.chain().len(), 2);
        assert!(ledger.rollback_history().is_empty());
    }

    #[test]
    fn test_rollback_notice_respects_local_limit() {
        let mut ledger = ledger_with(8, 2);
        let notice = RollbackNotice {
            invalid_block_hash: ledger.chain().get_blocks()[3].get_hash().to_string(),
            rollback_depth: 5,
            new_blockchain_length: 3,
            timestamp: 0,
            initiator: "node_b".to_string(),
        };
        assert!(!ledger.apply_rollback_notice(&notice).unwrap());
        assert_eq!(ledger.chain().len(), 8);

        let near_tip = RollbackNotice {
            invalid_block_hash: ledger.chain().get_blocks()[7].get_hash().to_string(),
            ..notice
        };
        assert!(ledger.apply_rollback_notice(&near_tip).unwrap());
        assert_eq!(ledger.chain().len(), 7);
    }

    #[test]
    fn test_sync_adopts_longer_valid_chain() {
        let mut ours = ledger_with(2, 10);
        let mut theirs = Ledger::new(MemoryPool::new(100), 10);
        theirs.chain = ours.chain().clone();
        extend(&mut theirs, 3, "peer");

        assert!(ours.sync_with_peer(theirs.chain().get_blocks()).unwrap());
        assert_eq!(ours.chain().len(), 5);
        assert!(ours.state().get("peer-2").is_some());

        // not strictly longer
        assert!(!ours.sync_with_peer(theirs.chain().get_blocks()).unwrap());
    }

    #[test]
    fn test_sync_refuses_invalid_chain() {
        let mut ours = ledger_with(1, 10);
        let mut blocks = ledger_with(3, 10).chain().get_blocks().to_vec();
        blocks[1].tamper_index(9);
        assert!(!ours.sync_with_peer(&blocks).unwrap());
        assert_eq!(ours.chain().len(), 1);
    }

    #[test]
    fn test_sync_refuses_unauthorized_transaction() {
        let mut ours = ledger_with(1, 10);
        let mut theirs = Ledger::new(MemoryPool::new(100), 10);
        theirs.chain = ours.chain().clone();
        let mut tx = Transaction::new(
            "Hospital_C",
            "Registry",
            1,
            Action::ValidateCase,
            "case-0",
            TxPayload::with_decision("APPROVE"),
        )
        .unwrap();
        tx.sign().unwrap();
        let mut block =
            Block::new_block(1, vec![tx], theirs.chain().get_tip_hash(), Role::Hospital).unwrap();
        block.sign("node_c");
        theirs.chain.add_block(block).unwrap();
        extend(&mut theirs, 1, "peer");

        assert!(!ours.sync_with_peer(theirs.chain().get_blocks()).unwrap());
        assert_eq!(ours.chain().len(), 1);
        assert!(ours.state().get("peer-0").is_none());
    }
}
