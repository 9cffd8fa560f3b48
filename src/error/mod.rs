//! Error handling for the ledger node
//!
//! Every fallible operation in the crate returns [`LedgerError`]. Validation
//! failures reject a single item (a transaction, a block, a vote) and never
//! take the node down.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Error kinds produced by the ledger node
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// Input has the wrong shape (missing fields, bad amount, bad signature)
    MalformedInput(String),
    /// An item with the same identifier already exists
    Duplicate(String),
    /// A bounded container is full
    CapacityExceeded { capacity: usize },
    /// The domain-rule gate refused the action for the actor's role
    Unauthorized(String),
    /// Hash, Merkle root, index or previous-hash check failed
    IntegrityMismatch(String),
    /// Rollback would remove more blocks than allowed; chain left unchanged
    RollbackDepthExceeded { depth: usize, max_depth: usize },
    /// Best-effort send to a peer that is not live
    PeerUnreachable(String),
    /// Lookup target does not exist
    NotFound(String),
    /// Socket level failures
    Network(String),
    /// Encoding/decoding errors
    Serialization(String),
    /// Configuration errors
    Config(String),
    /// File I/O errors
    Io(String),
}

impl LedgerError {
    /// Maps the error onto the client-facing rejection vocabulary, if it is
    /// one of the submission failures.
    pub fn rejection_reason(&self) -> Option<RejectionReason> {
        match self {
            LedgerError::CapacityExceeded { .. } => Some(RejectionReason::MempoolFull),
            LedgerError::Duplicate(_) => Some(RejectionReason::Duplicate),
            LedgerError::Unauthorized(_) => Some(RejectionReason::Unauthorized),
            LedgerError::MalformedInput(_) | LedgerError::Serialization(_) => {
                Some(RejectionReason::Malformed)
            }
            _ => None,
        }
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::MalformedInput(msg) => write!(f, "Malformed input: {msg}"),
            LedgerError::Duplicate(id) => write!(f, "Duplicate item: {id}"),
            LedgerError::CapacityExceeded { capacity } => {
                write!(f, "Capacity exceeded: limit is {capacity}")
            }
            LedgerError::Unauthorized(msg) => write!(f, "Unauthorized action: {msg}"),
            LedgerError::IntegrityMismatch(msg) => write!(f, "Integrity mismatch: {msg}"),
            LedgerError::RollbackDepthExceeded { depth, max_depth } => {
                write!(f, "Rollback depth {depth} exceeds maximum {max_depth}")
            }
            LedgerError::PeerUnreachable(peer) => write!(f, "Peer unreachable: {peer}"),
            LedgerError::NotFound(what) => write!(f, "Not found: {what}"),
            LedgerError::Network(msg) => write!(f, "Network error: {msg}"),
            LedgerError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            LedgerError::Config(msg) => write!(f, "Configuration error: {msg}"),
            LedgerError::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for LedgerError {
    fn from(err: toml::de::Error) -> Self {
        LedgerError::Config(err.to_string())
    }
}

/// Why a client submission was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    MempoolFull,
    Duplicate,
    Unauthorized,
    Malformed,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::MempoolFull => write!(f, "mempool-full"),
            RejectionReason::Duplicate => write!(f, "duplicate"),
            RejectionReason::Unauthorized => write!(f, "unauthorized"),
            RejectionReason::Malformed => write!(f, "malformed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_reason_mapping() {
        assert_eq!(
            LedgerError::CapacityExceeded { capacity: 1 }.rejection_reason(),
            Some(RejectionReason::MempoolFull)
        );
        assert_eq!(
            LedgerError::Duplicate("tx".to_string()).rejection_reason(),
            Some(RejectionReason::Duplicate)
        );
        assert_eq!(
            LedgerError::IntegrityMismatch("hash".to_string()).rejection_reason(),
            None
        );
    }

    #[test]
    fn test_display_messages() {
        let err = LedgerError::RollbackDepthExceeded {
            depth: 7,
            max_depth: 6,
        };
        assert_eq!(err.to_string(), "Rollback depth 7 exceeds maximum 6");
        assert_eq!(RejectionReason::MempoolFull.to_string(), "mempool-full");
    }
}
