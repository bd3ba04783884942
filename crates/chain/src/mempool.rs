//! Transaction mempool for pending transactions.
//!
//! The mempool stores structurally valid transactions waiting to be batched
//! into a block proposal. Batches are taken in arrival order.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tallychain_core::{Address, Hash, Transaction};
use thiserror::Error;

/// Errors that can occur during mempool operations.
#[derive(Debug, Error)]
pub enum MempoolError {
    #[error("transaction already in mempool")]
    DuplicateTransaction,

    #[error("mempool is full (capacity: {0})")]
    MempoolFull(usize),

    #[error("sender {sender} has {limit} pending transactions")]
    SenderLimit { sender: Address, limit: usize },

    #[error("transaction not found in mempool")]
    TransactionNotFound,
}

pub type Result<T> = std::result::Result<T, MempoolError>;

/// Configuration for the mempool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    /// Maximum number of transactions in the mempool.
    pub max_transactions: usize,
    /// Maximum pending transactions per sender.
    pub max_per_sender: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_transactions: 10_000,
            max_per_sender: 100,
        }
    }
}

/// Transaction mempool.
pub struct Mempool {
    config: MempoolConfig,
    /// Transactions indexed by hash.
    transactions: HashMap<Hash, Transaction>,
    /// Arrival order.
    order: VecDeque<Hash>,
    /// Pending count per sender.
    by_sender: HashMap<Address, usize>,
}

impl Mempool {
    /// Create a new mempool with default configuration.
    pub fn new() -> Self {
        Self::with_config(MempoolConfig::default())
    }

    /// Create a new mempool with the given configuration.
    pub fn with_config(config: MempoolConfig) -> Self {
        Self {
            config,
            transactions: HashMap::new(),
            order: VecDeque::new(),
            by_sender: HashMap::new(),
        }
    }

    /// Get the number of transactions in the mempool.
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Check if the mempool is empty.
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Check if a transaction is in the mempool.
    pub fn contains(&self, tx_hash: &Hash) -> bool {
        self.transactions.contains_key(tx_hash)
    }

    /// Add a transaction to the mempool, returning its hash.
    pub fn add(&mut self, tx: Transaction) -> Result<Hash> {
        let tx_hash = tx.hash();

        if self.contains(&tx_hash) {
            return Err(MempoolError::DuplicateTransaction);
        }

        if self.transactions.len() >= self.config.max_transactions {
            return Err(MempoolError::MempoolFull(self.config.max_transactions));
        }

        let pending = self.by_sender.get(&tx.sender).copied().unwrap_or(0);
        if pending >= self.config.max_per_sender {
            return Err(MempoolError::SenderLimit {
                sender: tx.sender.clone(),
                limit: self.config.max_per_sender,
            });
        }

        *self.by_sender.entry(tx.sender.clone()).or_default() += 1;
        self.order.push_back(tx_hash);
        self.transactions.insert(tx_hash, tx);

        Ok(tx_hash)
    }

    /// Remove a transaction from the mempool.
    pub fn remove(&mut self, tx_hash: &Hash) -> Result<Transaction> {
        let tx = self
            .transactions
            .remove(tx_hash)
            .ok_or(MempoolError::TransactionNotFound)?;

        self.order.retain(|h| h != tx_hash);

        if let Some(count) = self.by_sender.get_mut(&tx.sender) {
            *count -= 1;
            if *count == 0 {
                self.by_sender.remove(&tx.sender);
            }
        }

        Ok(tx)
    }

    /// Remove multiple transactions, ignoring ones that are not pending.
    ///
    /// Returns how many were actually removed.
    pub fn remove_batch(&mut self, tx_hashes: &[Hash]) -> usize {
        tx_hashes
            .iter()
            .filter(|hash| self.remove(hash).is_ok())
            .count()
    }

    /// Up to `limit` pending transactions, oldest first. Nothing is removed.
    pub fn get_pending(&self, limit: usize) -> Vec<Transaction> {
        self.order
            .iter()
            .take(limit)
            .filter_map(|h| self.transactions.get(h).cloned())
            .collect()
    }
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(sender: &str, amount: f64, timestamp: i64) -> Transaction {
        Transaction::new(Address::from(sender), Address::from("bob"), amount, timestamp)
    }

    #[test]
    fn test_mempool_add_and_get() {
        let mut mempool = Mempool::new();
        let tx = tx("alice", 10.0, 1);

        let tx_hash = mempool.add(tx.clone()).unwrap();
        assert_eq!(tx_hash, tx.hash());
        assert_eq!(mempool.len(), 1);
        assert!(mempool.contains(&tx_hash));
        assert_eq!(mempool.get_pending(1), vec![tx]);
    }

    #[test]
    fn test_mempool_duplicate_rejected() {
        let mut mempool = Mempool::new();
        let tx = tx("alice", 10.0, 1);

        mempool.add(tx.clone()).unwrap();
        assert!(matches!(
            mempool.add(tx),
            Err(MempoolError::DuplicateTransaction)
        ));
    }

    #[test]
    fn test_mempool_remove() {
        let mut mempool = Mempool::new();
        let tx = tx("alice", 10.0, 1);
        let tx_hash = mempool.add(tx.clone()).unwrap();

        let removed = mempool.remove(&tx_hash).unwrap();
        assert_eq!(removed, tx);
        assert!(mempool.is_empty());
        assert!(!mempool.contains(&tx_hash));
        assert!(matches!(
            mempool.remove(&tx_hash),
            Err(MempoolError::TransactionNotFound)
        ));
    }

    #[test]
    fn test_pending_is_fifo() {
        let mut mempool = Mempool::new();
        let txs: Vec<_> = (0..5).map(|i| tx("alice", 1.0 + i as f64, i)).collect();
        for t in &txs {
            mempool.add(t.clone()).unwrap();
        }

        assert_eq!(mempool.get_pending(3), txs[..3].to_vec());
        assert_eq!(mempool.get_pending(10), txs);
        // Reading leaves the pool untouched.
        assert_eq!(mempool.len(), 5);
    }

    #[test]
    fn test_remove_batch_keeps_rest_in_order() {
        let mut mempool = Mempool::new();
        let txs: Vec<_> = (0..4).map(|i| tx("alice", 1.0, i)).collect();
        for t in &txs {
            mempool.add(t.clone()).unwrap();
        }

        let removed = mempool.remove_batch(&[txs[0].hash(), txs[2].hash(), Hash::ZERO]);
        assert_eq!(removed, 2);
        assert_eq!(mempool.get_pending(10), vec![txs[1].clone(), txs[3].clone()]);
    }

    #[test]
    fn test_mempool_capacity_limit() {
        let config = MempoolConfig {
            max_transactions: 2,
            max_per_sender: 10,
        };
        let mut mempool = Mempool::with_config(config);

        mempool.add(tx("alice", 1.0, 1)).unwrap();
        mempool.add(tx("alice", 1.0, 2)).unwrap();
        assert!(matches!(
            mempool.add(tx("alice", 1.0, 3)),
            Err(MempoolError::MempoolFull(2))
        ));
    }

    #[test]
    fn test_mempool_sender_limit() {
        let config = MempoolConfig {
            max_transactions: 10,
            max_per_sender: 1,
        };
        let mut mempool = Mempool::with_config(config);

        mempool.add(tx("alice", 1.0, 1)).unwrap();
        assert!(matches!(
            mempool.add(tx("alice", 1.0, 2)),
            Err(MempoolError::SenderLimit { limit: 1, .. })
        ));
        mempool.add(tx("carol", 1.0, 2)).unwrap();

        // Freed once the pending one leaves.
        mempool.remove(&tx("alice", 1.0, 1).hash()).unwrap();
        mempool.add(tx("alice", 1.0, 2)).unwrap();
    }
}
