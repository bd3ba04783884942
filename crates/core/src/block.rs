//! Blocks and their structural validity rules.

use crate::address::Address;
use crate::hash::{hash, Hash};
use crate::merkle::merkle_root;
use crate::transaction::Transaction;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a block fails structural validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockError {
    #[error("merkle root mismatch (stored {stored}, computed {computed})")]
    MerkleRootMismatch { stored: Hash, computed: Hash },

    #[error("block hash mismatch (stored {stored}, computed {computed})")]
    HashMismatch { stored: Hash, computed: Hash },

    #[error("block index mismatch (expected {expected}, got {got})")]
    IndexMismatch { expected: u64, got: u64 },

    #[error("previous hash {got} does not match parent {expected}")]
    PreviousHashMismatch { expected: Hash, got: Hash },
}

/// A block in the hash chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Block height (0 for genesis).
    pub index: u64,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    /// Ordered transactions; the order is folded into the merkle root.
    pub transactions: Vec<Transaction>,
    /// Merkle root over the transaction hashes.
    pub merkle_root: Hash,
    /// Hash of the parent block.
    pub previous_hash: Hash,
    /// Hash of this block, covering every field above.
    pub hash: Hash,
}

/// The fields covered by the block hash.
#[derive(Serialize)]
struct BlockContents<'a> {
    index: u64,
    timestamp: i64,
    transactions: &'a [Transaction],
    merkle_root: &'a Hash,
    previous_hash: &'a Hash,
}

impl Block {
    /// Create a new block stamped with the current time.
    ///
    /// Any number of transactions is accepted here; batch sizing is a
    /// proposer policy.
    pub fn new(index: u64, transactions: Vec<Transaction>, previous_hash: Hash) -> Self {
        Self::with_timestamp(index, Utc::now().timestamp(), transactions, previous_hash)
    }

    /// Create a new block with an explicit timestamp.
    pub fn with_timestamp(
        index: u64,
        timestamp: i64,
        transactions: Vec<Transaction>,
        previous_hash: Hash,
    ) -> Self {
        let mut block = Self {
            index,
            timestamp,
            merkle_root: compute_merkle_root(&transactions),
            transactions,
            previous_hash,
            hash: Hash::ZERO,
        };
        block.hash = block.compute_hash();
        block
    }

    /// The genesis block.
    ///
    /// Fully deterministic (fixed seed transaction, timestamp 0) so that
    /// independently initialized nodes agree on the chain's first hash.
    pub fn genesis() -> Self {
        let seed = Transaction::new(Address::from("genesis"), Address::from("alice"), 100.0, 0);
        Self::with_timestamp(0, 0, vec![seed], Hash::ZERO)
    }

    /// Recompute the hash from the block contents. Never reads `self.hash`.
    pub fn compute_hash(&self) -> Hash {
        let contents = BlockContents {
            index: self.index,
            timestamp: self.timestamp,
            transactions: &self.transactions,
            merkle_root: &self.merkle_root,
            previous_hash: &self.previous_hash,
        };
        let encoded = bincode::serialize(&contents).expect("serialization should not fail");
        hash(&encoded)
    }

    /// Recompute the merkle root from the transactions.
    pub fn compute_merkle_root(&self) -> Hash {
        compute_merkle_root(&self.transactions)
    }

    /// Check the stored merkle root and hash against freshly computed values.
    ///
    /// Pure: the block is only read.
    pub fn validate(&self) -> Result<(), BlockError> {
        let computed = self.compute_merkle_root();
        if computed != self.merkle_root {
            return Err(BlockError::MerkleRootMismatch {
                stored: self.merkle_root,
                computed,
            });
        }

        let computed = self.compute_hash();
        if computed != self.hash {
            return Err(BlockError::HashMismatch {
                stored: self.hash,
                computed,
            });
        }

        Ok(())
    }

    /// Boolean form of [`Block::validate`].
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Check this block chains directly onto `parent`.
    pub fn extends(&self, parent: &Block) -> Result<(), BlockError> {
        let expected = parent.index + 1;
        if self.index != expected {
            return Err(BlockError::IndexMismatch {
                expected,
                got: self.index,
            });
        }

        if self.previous_hash != parent.hash {
            return Err(BlockError::PreviousHashMismatch {
                expected: parent.hash,
                got: self.previous_hash,
            });
        }

        Ok(())
    }

    /// Check if this is the genesis block.
    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.previous_hash == Hash::ZERO
    }

    /// Get the number of transactions in this block.
    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }

    /// Hashes of the contained transactions, in block order.
    pub fn tx_hashes(&self) -> Vec<Hash> {
        self.transactions.iter().map(|tx| tx.hash()).collect()
    }
}

fn compute_merkle_root(transactions: &[Transaction]) -> Hash {
    let tx_hashes: Vec<Hash> = transactions.iter().map(|tx| tx.hash()).collect();
    merkle_root(&tx_hashes)
}
