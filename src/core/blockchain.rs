// This is the chain itself - an ordered, append-only list of blocks held in memory
// Every block I accept must extend the current tip: right index, right previous hash,
// intact hash, Merkle root and leader signature. Nothing here is persisted.

use crate::core::block::GENESIS_PREVIOUS_HASH;
use crate::core::{Block, Transaction};
use crate::error::{LedgerError, Result};
use log::{info, warn};
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct Blockchain {
    blocks: Vec<Block>,
    // ids of every committed transaction, so the mempool can refuse replays
    committed_ids: HashSet<String>,
}

impl Blockchain {
    pub fn new() -> Blockchain {
        Blockchain::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get_blocks(&self) -> &[Block] {
        self.blocks.as_slice()
    }

    pub fn get_last_block(&self) -> Option<&Block> {
        self.blocks.last()
    }

    // The hash the next block must point at: "0" while the chain is empty
    pub fn get_tip_hash(&self) -> &str {
        self.blocks
            .last()
            .map(|block| block.get_hash())
            .unwrap_or(GENESIS_PREVIOUS_HASH)
    }

    pub fn get_block(&self, block_hash: &str) -> Option<&Block> {
        self.blocks.iter().find(|block| block.get_hash() == block_hash)
    }

    pub fn find_block_index(&self, block_hash: &str) -> Option<usize> {
        self.blocks
            .iter()
            .position(|block| block.get_hash() == block_hash)
    }

    pub fn block_exists(&self, block_hash: &str) -> bool {
        self.find_block_index(block_hash).is_some()
    }

    pub fn contains_transaction(&self, txid: &str) -> bool {
        self.committed_ids.contains(txid)
    }

    pub fn find_transaction(&self, txid: &str) -> Option<&Transaction> {
        if !self.contains_transaction(txid) {
            return None;
        }
        self.blocks
            .iter()
            .flat_map(|block| block.get_transactions())
            .find(|tx| tx.get_id() == txid)
    }

    /// Checks that `block` is intact and extends the current tip
    pub fn check_block(&self, block: &Block) -> Result<()> {
        block.check_integrity()?;

        let expected_index = self.blocks.len() as u64;
        if block.get_index() != expected_index {
            return Err(LedgerError::IntegrityMismatch(format!(
                "Block index {} does not match chain length {}",
                block.get_index(),
                expected_index
            )));
        }

        if block.get_previous_hash() != self.get_tip_hash() {
            return Err(LedgerError::IntegrityMismatch(format!(
                "Block {} previous hash {} does not match tip {}",
                block.get_index(),
                block.get_previous_hash(),
                self.get_tip_hash()
            )));
        }

        Ok(())
    }

    pub fn validate_block(&self, block: &Block) -> bool {
        match self.check_block(block) {
            Ok(()) => true,
            Err(e) => {
                warn!("Block validation failed: {e}");
                false
            }
        }
    }

    // I append only after a full check; transactions are confirmed on the way in
    pub fn add_block(&mut self, mut block: Block) -> Result<&Block> {
        self.check_block(&block)?;
        block.confirm_transactions();
        for tx in block.get_transactions() {
            self.committed_ids.insert(tx.get_id().to_string());
        }
        info!(
            "Block {} appended to chain: {}",
            block.get_index(),
            block.get_hash()
        );
        self.blocks.push(block);
        Ok(&self.blocks[self.blocks.len() - 1])
    }

    /// Removes the block at `index` and everything after it, returning what was removed
    pub fn truncate(&mut self, index: usize) -> Vec<Block> {
        if index >= self.blocks.len() {
            return Vec::new();
        }
        let removed = self.blocks.split_off(index);
        for tx in removed.iter().flat_map(|block| block.get_transactions()) {
            self.committed_ids.remove(tx.get_id());
        }
        removed
    }

    /// Builds the chain that results from adopting `peer_blocks`.
    ///
    /// Blocks shared with the local chain (same hash at the same position) are
    /// kept; every block after the fork point must validate in order against
    /// the growing candidate. Returns `Ok(None)` when the peer chain is not
    /// strictly longer.
    pub fn candidate_from_peer(&self, peer_blocks: &[Block]) -> Result<Option<Blockchain>> {
        if peer_blocks.len() <= self.blocks.len() {
            return Ok(None);
        }

        let common = self
            .blocks
            .iter()
            .zip(peer_blocks.iter())
            .take_while(|(ours, theirs)| ours.get_hash() == theirs.get_hash())
            .count();

        let mut candidate = self.clone();
        candidate.truncate(common);
        for block in &peer_blocks[common..] {
            candidate.add_block(block.clone())?;
        }
        Ok(Some(candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Action, Role, TxPayload};
    use serde_json::json;

    fn signed_tx(entity: &str) -> Transaction {
        let mut tx = Transaction::new(
            "NGO_Alpha",
            "Registry",
            1,
            Action::OpenCase,
            entity,
            TxPayload::with_record(json!({"name": entity})),
        )
        .unwrap();
        tx.sign().unwrap();
        tx
    }

    fn next_block(chain: &Blockchain, entity: &str) -> Block {
        let mut block = Block::new_block(
            chain.len() as u64,
            vec![signed_tx(entity)],
            chain.get_tip_hash(),
            Role::Ngo,
        )
        .unwrap();
        block.sign("node_test");
        block
    }

    fn chain_of(len: usize) -> Blockchain {
        let mut chain = Blockchain::new();
        for i in 0..len {
            let block = next_block(&chain, &format!("case-{i}"));
            chain.add_block(block).unwrap();
        }
        chain
    }

    #[test]
    fn test_empty_chain_tip_is_zero() {
        let chain = Blockchain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.get_tip_hash(), "0");
    }

    #[test]
    fn test_add_block_confirms_and_indexes_transactions() {
        let mut chain = Blockchain::new();
        let block = next_block(&chain, "c1");
        let txid = block.get_transactions()[0].get_id().to_string();
        chain.add_block(block).unwrap();

        assert_eq!(chain.len(), 1);
        assert!(chain.contains_transaction(&txid));
        let tx = chain.find_transaction(&txid).unwrap();
        assert_eq!(tx.get_status(), crate::core::TxStatus::Confirmed);
    }

    #[test]
    fn test_rejects_wrong_index_and_previous_hash() {
        let chain = chain_of(2);

        let mut block = next_block(&chain, "c9");
        block.tamper_index(5);
        assert!(!chain.validate_block(&block));

        let mut block =
            Block::new_block(2, vec![signed_tx("c9")], "not-the-tip", Role::Ngo).unwrap();
        block.sign("k");
        assert!(matches!(
            chain.check_block(&block),
            Err(LedgerError::IntegrityMismatch(_))
        ));
    }

    #[test]
    fn test_rejects_unsigned_and_bad_merkle() {
        let chain = Blockchain::new();
        let mut block = next_block(&chain, "c1");
        block.clear_signature();
        assert!(!chain.validate_block(&block));

        let mut block = next_block(&chain, "c1");
        block.tamper_merkle_root("ff");
        assert!(!chain.validate_block(&block));
    }

    #[test]
    fn test_truncate_forgets_transactions() {
        let mut chain = chain_of(4);
        let txid = chain.get_blocks()[3].get_transactions()[0]
            .get_id()
            .to_string();
        let removed = chain.truncate(2);
        assert_eq!(removed.len(), 2);
        assert_eq!(chain.len(), 2);
        assert!(!chain.contains_transaction(&txid));
        assert!(chain.truncate(10).is_empty());
    }

    #[test]
    fn test_candidate_from_longer_peer() {
        let ours = chain_of(2);
        let mut theirs = ours.clone();
        for i in 0..3 {
            let block = next_block(&theirs, &format!("peer-{i}"));
            theirs.add_block(block).unwrap();
        }

        let candidate = ours
            .candidate_from_peer(theirs.get_blocks())
            .unwrap()
            .unwrap();
        assert_eq!(candidate.len(), 5);
        assert_eq!(candidate.get_tip_hash(), theirs.get_tip_hash());

        assert!(theirs
            .candidate_from_peer(ours.get_blocks())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_candidate_rejects_broken_peer_chain() {
        let ours = chain_of(1);
        let mut blocks = chain_of(3).get_blocks().to_vec();
        blocks[2].tamper_index(7);
        assert!(ours.candidate_from_peer(&blocks).is_err());
    }
}
