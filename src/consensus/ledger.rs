use crate::consensus::RollbackRecord;
use crate::core::{Block, Blockchain};
use crate::error::Result;
use crate::storage::{LedgerState, MemoryPool};
use log::info;

pub const DEFAULT_MAX_ROLLBACK_DEPTH: usize = 10;

/// Everything that changes when a block is finalized: the chain, the entity
/// projection folded from it, the pool the block's transactions came from
/// and the audit trail of rollbacks.
pub struct Ledger {
    pub(crate) chain: Blockchain,
    pub(crate) state: LedgerState,
    pub(crate) mempool: MemoryPool,
    pub(crate) rollback_history: Vec<RollbackRecord>,
    pub(crate) max_rollback_depth: usize,
}

impl Ledger {
    pub fn new(mempool: MemoryPool, max_rollback_depth: usize) -> Ledger {
        Ledger {
            chain: Blockchain::new(),
            state: LedgerState::new(),
            mempool,
            rollback_history: Vec::new(),
            max_rollback_depth,
        }
    }

    pub fn chain(&self) -> &Blockchain {
        &self.chain
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    pub fn mempool(&self) -> &MemoryPool {
        &self.mempool
    }

    pub fn mempool_mut(&mut self) -> &mut MemoryPool {
        &mut self.mempool
    }

    pub fn rollback_history(&self) -> &[RollbackRecord] {
        self.rollback_history.as_slice()
    }

    pub fn max_rollback_depth(&self) -> usize {
        self.max_rollback_depth
    }

    /// Runs the pool's domain rules over every transaction in `block`
    pub fn check_rules(&self, block: &Block) -> Result<()> {
        let rules = self.mempool.rules();
        block
            .get_transactions()
            .iter()
            .try_for_each(|tx| rules.check(tx))
    }

    /// Appends an agreed block, folds it into the projection and evicts its
    /// transactions from the pool.
    ///
    /// Returns `Ok(false)` when the block is already on the chain.
    pub fn finalize_block(&mut self, block: Block) -> Result<bool> {
        if self.chain.block_exists(block.get_hash()) {
            return Ok(false);
        }

        let appended = self.chain.add_block(block)?;
        self.state.apply_block(appended);
        let evicted = self
            .mempool
            .evict(appended.get_transactions().iter().map(|tx| tx.get_id()));
        info!(
            "Block {} finalized with {} transactions ({} evicted from mempool)",
            appended.get_index(),
            appended.get_transactions().len(),
            evicted
        );
        Ok(true)
    }

    /// Drops pool entries that the chain has already committed
    pub(crate) fn evict_committed(&mut self) -> usize {
        let committed: Vec<String> = self
            .mempool
            .get_all()
            .into_iter()
            .filter(|tx| self.chain.contains_transaction(tx.get_id()))
            .map(|tx| tx.get_id().to_string())
            .collect();
        self.mempool.evict(committed.iter().map(String::as_str))
    }
}
