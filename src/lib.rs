//! # Welfare Chain
//!
//! A permissioned ledger node for child-welfare case records. Organisations
//! (NGOs, government offices, hospitals, auditors, administrators) submit
//! role-gated transactions; nodes agree on blocks and every node folds the
//! agreed chain into the same case projection.
//!
//! ## Layout
//! - `core/`: transactions, merkle trees, blocks, the chain and role rules
//! - `storage/`: the pending-transaction pool and the case projection
//! - `consensus/`: leader rotation, vote and quorum engines, rollback and resync
//! - `network/`: peer messages, routing and the TCP server
//! - `node`: one ledger node tying the above together
//! - `config/`: settings from TOML files and the environment
//! - `cli/`: command-line interface
//!
//! Everything is held in memory. A restarted node starts empty and catches up
//! from its peers.

pub mod cli;
pub mod config;
pub mod consensus;
pub mod core;
pub mod error;
pub mod network;
pub mod node;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub mod testnet;

pub use cli::{Command, Opt};
pub use config::Config;
pub use consensus::{ConsensusEngine, ConsensusKind, Ledger, QuorumEngine, VoteEngine};
pub use core::{Action, Block, Blockchain, Role, Transaction, TransactionRequest, TxPayload};
pub use error::{LedgerError, RejectionReason, Result};
pub use network::{send_request, send_transaction, PeerMessage, Server};
pub use node::{LedgerNode, SubmitResponse};
pub use storage::{CaseStatus, EntityRecord, LedgerState, MemoryPool};
pub use utils::{current_timestamp, sha256_hex};
