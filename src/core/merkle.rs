use crate::core::Transaction;
use crate::error::{LedgerError, Result};
use crate::utils::sha256_hex;
use serde::{Deserialize, Serialize};

/// Merkle root recorded for a block without transactions
pub const EMPTY_MERKLE_ROOT: &str = "0";

/// Merkle tree over a block's transactions
///
/// Leaves are the transactions' signatures (or ids when unsigned). A parent is
/// the SHA-256 hex of its children's hex strings concatenated; an odd node at
/// the end of a level is paired with itself. A single leaf is its own root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleTree {
    // levels[0] holds the leaves, the last level holds the root
    levels: Vec<Vec<String>>,
}

/// Merkle proof for transaction verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Leaf being proven
    pub leaf: String,
    pub merkle_root: String,
    /// Sibling hashes from the leaf level upwards
    pub proof_path: Vec<ProofElement>,
    /// Index of the transaction in the block
    pub transaction_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofElement {
    pub hash: String,
    /// true if the sibling is on the right
    pub is_right: bool,
}

impl MerkleTree {
    pub fn new(transactions: &[Transaction]) -> MerkleTree {
        let leaves: Vec<String> = transactions
            .iter()
            .map(|tx| tx.merkle_leaf().to_string())
            .collect();
        MerkleTree::from_leaves(leaves)
    }

    pub fn from_leaves(leaves: Vec<String>) -> MerkleTree {
        let mut levels = vec![leaves];
        while levels.last().map(|level| level.len() > 1).unwrap_or(false) {
            let next = match levels.last() {
                Some(level) => Self::next_level(level),
                None => break,
            };
            levels.push(next);
        }
        MerkleTree { levels }
    }

    fn next_level(level: &[String]) -> Vec<String> {
        level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => Self::hash_pair(left, right),
                [single] => Self::hash_pair(single, single),
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect()
    }

    fn hash_pair(left: &str, right: &str) -> String {
        let mut combined = String::with_capacity(left.len() + right.len());
        combined.push_str(left);
        combined.push_str(right);
        sha256_hex(combined.as_bytes())
    }

    /// Root hash, or `"0"` for an empty tree
    pub fn root(&self) -> String {
        self.levels
            .last()
            .and_then(|level| level.first())
            .cloned()
            .unwrap_or_else(|| EMPTY_MERKLE_ROOT.to_string())
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(|leaves| leaves.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_count() == 0
    }

    /// Generate a Merkle proof for the transaction at the given index
    pub fn generate_proof(&self, transaction_index: usize) -> Result<MerkleProof> {
        let leaf = self
            .levels
            .first()
            .and_then(|leaves| leaves.get(transaction_index))
            .cloned()
            .ok_or_else(|| {
                LedgerError::NotFound(format!(
                    "Transaction index {} out of bounds (leaves: {})",
                    transaction_index,
                    self.leaf_count()
                ))
            })?;

        let mut proof_path = Vec::new();
        let mut index = transaction_index;
        for level in &self.levels[..self.levels.len() - 1] {
            let element = if index % 2 == 0 {
                // the last node of an odd level is its own sibling
                let sibling = level.get(index + 1).unwrap_or(&level[index]);
                ProofElement {
                    hash: sibling.clone(),
                    is_right: true,
                }
            } else {
                ProofElement {
                    hash: level[index - 1].clone(),
                    is_right: false,
                }
            };
            proof_path.push(element);
            index /= 2;
        }

        Ok(MerkleProof {
            leaf,
            merkle_root: self.root(),
            proof_path,
            transaction_index,
        })
    }

    pub fn verify_proof(proof: &MerkleProof) -> bool {
        let mut current = proof.leaf.clone();
        for element in &proof.proof_path {
            current = if element.is_right {
                Self::hash_pair(&current, &element.hash)
            } else {
                Self::hash_pair(&element.hash, &current)
            };
        }
        current == proof.merkle_root
    }

    /// Merkle root of a transaction list without keeping the tree around
    pub fn calculate_merkle_root(transactions: &[Transaction]) -> String {
        MerkleTree::new(transactions).root()
    }

    /// Verify that a list of transactions produces the expected Merkle root
    pub fn verify_transactions(transactions: &[Transaction], expected_root: &str) -> bool {
        Self::calculate_merkle_root(transactions) == expected_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_empty_root_is_zero() {
        let tree = MerkleTree::from_leaves(vec![]);
        assert!(tree.is_empty());
        assert_eq!(tree.root(), "0");
        assert_eq!(MerkleTree::calculate_merkle_root(&[]), "0");
    }

    #[test]
    fn test_single_leaf_is_root() {
        let tree = MerkleTree::from_leaves(leaves(&["abc"]));
        assert_eq!(tree.root(), "abc");
    }

    #[test]
    fn test_pair_hashes_concatenated_hex() {
        let tree = MerkleTree::from_leaves(leaves(&["aa", "bb"]));
        assert_eq!(tree.root(), sha256_hex(b"aabb"));
    }

    #[test]
    fn test_odd_leaf_is_duplicated() {
        let tree = MerkleTree::from_leaves(leaves(&["a", "b", "c"]));
        let left = sha256_hex(b"ab");
        let right = sha256_hex(b"cc");
        let expected = sha256_hex(format!("{left}{right}").as_bytes());
        assert_eq!(tree.root(), expected);
    }

    #[test]
    fn test_proofs_verify_for_every_leaf() {
        let tree = MerkleTree::from_leaves(leaves(&["t1", "t2", "t3", "t4", "t5"]));
        for index in 0..tree.leaf_count() {
            let proof = tree.generate_proof(index).unwrap();
            assert_eq!(proof.merkle_root, tree.root());
            assert!(MerkleTree::verify_proof(&proof), "leaf {index} failed");
        }
    }

    #[test]
    fn test_tampered_proof_fails() {
        let tree = MerkleTree::from_leaves(leaves(&["t1", "t2", "t3"]));
        let mut proof = tree.generate_proof(1).unwrap();
        proof.leaf = "forged".to_string();
        assert!(!MerkleTree::verify_proof(&proof));
    }

    #[test]
    fn test_proof_index_out_of_bounds() {
        let tree = MerkleTree::from_leaves(leaves(&["t1"]));
        assert!(tree.generate_proof(1).is_err());
    }
}
