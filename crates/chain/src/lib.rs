//! Ledger orchestration for tallychain.
//!
//! - **Ledger**: the durable, hash-chained block store and its single commit
//!   entry point, [`Ledger::add_block`]
//! - **Mempool**: transactions waiting to be batched into a proposal
//!
//! # Example
//!
//! ```rust,no_run
//! use tallychain_chain::Ledger;
//! use tallychain_core::{Block, Transaction};
//!
//! let ledger = Ledger::open_path("./ledger_data").unwrap();
//! let parent = ledger.latest_block().unwrap();
//! let tx = Transaction::transfer("alice", "bob", 5.0);
//! let block = Block::new(parent.index + 1, vec![tx], parent.hash);
//! ledger.add_block(&block).unwrap();
//! ```

pub mod ledger;
pub mod mempool;

// Re-export commonly used types
pub use ledger::{Ledger, LedgerError};
pub use mempool::{Mempool, MempoolConfig, MempoolError};
