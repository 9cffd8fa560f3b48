use crate::core::merkle::EMPTY_MERKLE_ROOT;
use crate::core::transaction::TxHashView;
use crate::core::{MerkleProof, MerkleTree, Role, Transaction, TxStatus};
use crate::error::{LedgerError, Result};
use crate::utils::{canonical_bytes, current_timestamp, sha256_hex};
use log::debug;
use serde::{Deserialize, Serialize};

/// `previousHash` of the first block in a chain
pub const GENESIS_PREVIOUS_HASH: &str = EMPTY_MERKLE_ROOT;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    index: u64,
    timestamp: i64,
    transactions: Vec<Transaction>,
    previous_hash: String,
    leader: Role,
    merkle_root: String,
    hash: String,
    #[serde(default)]
    signature: Option<String>,
}

// Field order here is the hash input order
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BlockHashView<'a> {
    index: u64,
    timestamp: i64,
    transactions: Vec<TxHashView<'a>>,
    previous_hash: &'a str,
    leader: Role,
    merkle_root: &'a str,
}

impl Block {
    /// Builds an unsigned block stamped with the current time
    pub fn new_block(
        index: u64,
        transactions: Vec<Transaction>,
        previous_hash: &str,
        leader: Role,
    ) -> Result<Block> {
        Block::with_timestamp(
            index,
            current_timestamp()?,
            transactions,
            previous_hash,
            leader,
        )
    }

    pub fn with_timestamp(
        index: u64,
        timestamp: i64,
        transactions: Vec<Transaction>,
        previous_hash: &str,
        leader: Role,
    ) -> Result<Block> {
        let merkle_root = MerkleTree::calculate_merkle_root(&transactions);
        let mut block = Block {
            index,
            timestamp,
            transactions,
            previous_hash: previous_hash.to_string(),
            leader,
            merkle_root,
            hash: String::new(),
            signature: None,
        };
        block.hash = block.compute_hash()?;
        debug!(
            "Built block {} with {} transactions: {}",
            block.index,
            block.transactions.len(),
            block.hash
        );
        Ok(block)
    }

    /// SHA-256 hex over the block header and its transactions (status excluded)
    pub fn compute_hash(&self) -> Result<String> {
        let view = BlockHashView {
            index: self.index,
            timestamp: self.timestamp,
            transactions: self.transactions.iter().map(|tx| tx.hash_view()).collect(),
            previous_hash: &self.previous_hash,
            leader: self.leader,
            merkle_root: &self.merkle_root,
        };
        Ok(sha256_hex(&canonical_bytes(&view)?))
    }

    /// Hash stand-in signature: SHA-256 of the block hash followed by the key
    pub fn sign(&mut self, key: &str) -> &str {
        let signature = sha256_hex(format!("{}{}", self.hash, key).as_bytes());
        self.signature.insert(signature).as_str()
    }

    pub fn verify_hash(&self) -> bool {
        match self.compute_hash() {
            Ok(hash) => hash == self.hash,
            Err(_) => false,
        }
    }

    pub fn verify_merkle_root(&self) -> bool {
        MerkleTree::verify_transactions(&self.transactions, &self.merkle_root)
    }

    /// Structural checks that do not depend on any chain
    pub fn check_integrity(&self) -> Result<()> {
        if !self.verify_hash() {
            return Err(LedgerError::IntegrityMismatch(format!(
                "Block {} hash does not match its contents",
                self.index
            )));
        }
        if !self.verify_merkle_root() {
            return Err(LedgerError::IntegrityMismatch(format!(
                "Block {} merkle root does not match its transactions",
                self.index
            )));
        }
        if self.signature.as_deref().map(str::is_empty).unwrap_or(true) {
            return Err(LedgerError::IntegrityMismatch(format!(
                "Block {} carries no leader signature",
                self.index
            )));
        }
        Ok(())
    }

    /// Generate a Merkle proof for a transaction in this block
    pub fn generate_merkle_proof(&self, transaction_index: usize) -> Result<MerkleProof> {
        MerkleTree::new(&self.transactions).generate_proof(transaction_index)
    }

    /// Verify a Merkle proof against this block's Merkle root
    pub fn verify_merkle_proof(&self, proof: &MerkleProof) -> bool {
        proof.merkle_root == self.merkle_root && MerkleTree::verify_proof(proof)
    }

    /// Marks every transaction confirmed. Status is outside the hash, so the block stays valid.
    pub fn confirm_transactions(&mut self) {
        for tx in self.transactions.iter_mut() {
            tx.set_status(TxStatus::Confirmed);
        }
    }

    pub fn get_index(&self) -> u64 {
        self.index
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_previous_hash(&self) -> &str {
        self.previous_hash.as_str()
    }

    pub fn get_leader(&self) -> Role {
        self.leader
    }

    pub fn get_merkle_root(&self) -> &str {
        self.merkle_root.as_str()
    }

    pub fn get_hash(&self) -> &str {
        self.hash.as_str()
    }

    pub fn get_signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    /// Test helpers for tampering with an otherwise valid block
    #[cfg(test)]
    pub fn tamper_index(&mut self, index: u64) {
        self.index = index;
    }

    #[cfg(test)]
    pub fn tamper_merkle_root(&mut self, merkle_root: &str) {
        self.merkle_root = merkle_root.to_string();
    }

    #[cfg(test)]
    pub fn clear_signature(&mut self) {
        self.signature = None;
    }
}
