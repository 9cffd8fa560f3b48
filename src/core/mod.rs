//! Core ledger types
//!
//! Transactions, blocks, the chain, Merkle commitments and the role rules
//! that gate which participant may perform which action.

pub mod block;
pub mod blockchain;
pub mod merkle;
pub mod payload;
pub mod roles;
pub mod transaction;

pub use block::{Block, GENESIS_PREVIOUS_HASH};
pub use blockchain::Blockchain;
pub use merkle::{MerkleProof, MerkleTree, ProofElement, EMPTY_MERKLE_ROOT};
pub use payload::{
    offload_large_record, BlobRef, BlobStore, MemoryBlobStore, RecordPayload, TxPayload,
    OFFLOAD_THRESHOLD_BYTES,
};
pub use roles::{is_action_allowed, Action, Decision, DomainRules, Role, RoleRules, ROLE_ACTIONS};
pub use transaction::{Transaction, TransactionRequest, TxStatus};
