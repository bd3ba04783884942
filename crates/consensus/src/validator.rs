//! Structural validation of transactions and proposed blocks.
//!
//! These checks are what a follower runs before voting. Signatures are not
//! verified here; the wallet layer owns them.

use std::collections::HashSet;
use tallychain_core::{Block, BlockError, Transaction};
use thiserror::Error;

/// Errors that can occur during validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("transaction amount must be positive (got {0})")]
    NonPositiveAmount(f64),

    #[error("transaction sender or receiver is empty")]
    MissingAddress,

    #[error("proposed block index must be positive")]
    NonPositiveIndex,

    #[error("block carries no transactions")]
    EmptyBlock,

    #[error("transaction {index} in block: {source}")]
    InvalidTransaction {
        index: usize,
        #[source]
        source: Box<ValidationError>,
    },

    #[error("duplicate transaction in block")]
    DuplicateTransaction,

    #[error(transparent)]
    Block(#[from] BlockError),
}

pub type Result<T> = std::result::Result<T, ValidationError>;

/// Transaction validator.
pub struct TransactionValidator;

impl TransactionValidator {
    /// Amount is positive and both endpoints are present.
    pub fn validate_transaction(tx: &Transaction) -> Result<()> {
        if !tx.has_positive_amount() {
            return Err(ValidationError::NonPositiveAmount(tx.amount));
        }
        if !tx.has_addresses() {
            return Err(ValidationError::MissingAddress);
        }
        Ok(())
    }
}

/// Block validator.
pub struct BlockValidator;

impl BlockValidator {
    /// Every transaction is valid and none repeats.
    pub fn validate_block_transactions(block: &Block) -> Result<()> {
        let mut seen = HashSet::new();
        for (index, tx) in block.transactions.iter().enumerate() {
            TransactionValidator::validate_transaction(tx).map_err(|e| {
                ValidationError::InvalidTransaction {
                    index,
                    source: Box::new(e),
                }
            })?;
            if !seen.insert(tx.hash()) {
                return Err(ValidationError::DuplicateTransaction);
            }
        }
        Ok(())
    }

    /// Checks a follower runs on a proposal before voting for it, and that
    /// recovery runs on every synced block.
    ///
    /// Continuity with the local chain is not checked: a lagging follower may
    /// still vote, and the leader's ledger rejects anything that does not
    /// extend its head.
    pub fn validate_proposal(block: &Block) -> Result<()> {
        if block.index == 0 {
            return Err(ValidationError::NonPositiveIndex);
        }
        if block.transactions.is_empty() {
            return Err(ValidationError::EmptyBlock);
        }
        Self::validate_block_transactions(block)?;
        block.validate()?;
        Ok(())
    }
}
