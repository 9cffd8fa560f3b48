use crate::core::{DomainRules, RoleRules, Transaction, TxStatus};
use crate::error::{LedgerError, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_MEMPOOL_CAPACITY: usize = 1000;

struct PoolEntry {
    tx: Transaction,
    // insertion order, used to break timestamp ties
    seq: u64,
}

/// Counters reported by [`MemoryPool::stats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MempoolStats {
    pub total: usize,
    pub pending: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub max_size: usize,
}

/// ( K -> txid, V => Transaction )
///
/// Bounded pool of submitted transactions awaiting a block. Owned by the node's
/// single writer, so it takes `&mut self` and needs no locking.
pub struct MemoryPool {
    inner: HashMap<String, PoolEntry>,
    max_size: usize,
    next_seq: u64,
    rules: Arc<dyn DomainRules>,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new(DEFAULT_MEMPOOL_CAPACITY)
    }
}

impl MemoryPool {
    pub fn new(max_size: usize) -> MemoryPool {
        MemoryPool::with_rules(max_size, Arc::new(RoleRules))
    }

    pub fn with_rules(max_size: usize, rules: Arc<dyn DomainRules>) -> MemoryPool {
        MemoryPool {
            inner: HashMap::new(),
            max_size,
            next_seq: 0,
            rules,
        }
    }

    pub fn rules(&self) -> Arc<dyn DomainRules> {
        Arc::clone(&self.rules)
    }

    /// Runs the intake checks without inserting: structure, authenticity, domain rules
    pub fn validate(&self, tx: &Transaction) -> Result<()> {
        tx.validate_structure()?;
        if !tx.is_authentic() {
            return Err(LedgerError::MalformedInput(format!(
                "Transaction {} has no valid signature",
                tx.get_id()
            )));
        }
        self.rules.check(tx)
    }

    /// Capacity, duplicate id, then [`MemoryPool::validate`]. Accepted transactions are pending.
    pub fn submit(&mut self, mut tx: Transaction) -> Result<()> {
        if self.inner.len() >= self.max_size {
            return Err(LedgerError::CapacityExceeded {
                capacity: self.max_size,
            });
        }
        if self.inner.contains_key(tx.get_id()) {
            return Err(LedgerError::Duplicate(tx.get_id().to_string()));
        }
        self.validate(&tx)?;

        tx.set_status(TxStatus::Pending);
        let seq = self.next_seq;
        self.next_seq += 1;
        info!("Transaction {} added to mempool", tx.get_id());
        self.inner.insert(tx.get_id().to_string(), PoolEntry { tx, seq });
        Ok(())
    }

    /// Up to `limit` pending transactions, most recent first
    pub fn take(&self, limit: usize) -> Vec<Transaction> {
        let mut pending: Vec<&PoolEntry> = self
            .inner
            .values()
            .filter(|entry| entry.tx.get_status() == TxStatus::Pending)
            .collect();
        pending.sort_by(|a, b| {
            b.tx.get_timestamp()
                .cmp(&a.tx.get_timestamp())
                .then(b.seq.cmp(&a.seq))
        });
        pending
            .into_iter()
            .take(limit)
            .map(|entry| entry.tx.clone())
            .collect()
    }

    pub fn evict<'a, I>(&mut self, txids: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut removed = 0;
        for txid in txids {
            if self.inner.remove(txid).is_some() {
                debug!("Transaction {txid} removed from mempool");
                removed += 1;
            }
        }
        removed
    }

    pub fn set_status(&mut self, txid: &str, status: TxStatus) -> Result<()> {
        let entry = self
            .inner
            .get_mut(txid)
            .ok_or_else(|| LedgerError::NotFound(format!("Transaction {txid} not in mempool")))?;
        entry.tx.set_status(status);
        Ok(())
    }

    pub fn get(&self, txid: &str) -> Option<&Transaction> {
        self.inner.get(txid).map(|entry| &entry.tx)
    }

    pub fn contains(&self, txid: &str) -> bool {
        self.inner.contains_key(txid)
    }

    pub fn size(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn get_all(&self) -> Vec<Transaction> {
        self.inner.values().map(|entry| entry.tx.clone()).collect()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn stats(&self) -> MempoolStats {
        let mut stats = MempoolStats {
            total: self.inner.len(),
            pending: 0,
            confirmed: 0,
            failed: 0,
            max_size: self.max_size,
        };
        for entry in self.inner.values() {
            match entry.tx.get_status() {
                TxStatus::Pending => stats.pending += 1,
                TxStatus::Confirmed => stats.confirmed += 1,
                TxStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }
}
