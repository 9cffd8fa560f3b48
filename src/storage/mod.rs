//! In-memory node state
//!
//! The memory pool of submitted transactions and the per-entity ledger
//! projection derived from the committed chain. Nothing here is persisted.

pub mod ledger_state;
pub mod memory_pool;

pub use ledger_state::{
    apply, CaseFlag, CaseStatus, EntityRecord, LedgerState, Provenance, SubRecord, SubRecordKind,
};
pub use memory_pool::{MemoryPool, MempoolStats, DEFAULT_MEMPOOL_CAPACITY};
