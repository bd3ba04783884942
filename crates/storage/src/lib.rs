//! Persistent storage layer for tallychain.
//!
//! The ledger only needs an ordered byte-map: point reads, point writes,
//! atomic batches and a prefix scan used once at cold start. That contract is
//! the [`KvStore`] trait; [`SledStore`] is the production backend.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              Ledger (chain crate)            │
//! └──────────────────────┬──────────────────────┘
//!                        │
//! ┌──────────────────────▼──────────────────────┐
//! │  ChainStore          │  Storage             │
//! │   - blocks by hash   │   - bincode values   │
//! │   - height index     │   - key helpers      │
//! │   - head + height    │   - atomic batches   │
//! └──────────────────────┬──────────────────────┘
//!                        │ KvStore
//! ┌──────────────────────▼──────────────────────┐
//! │                sled database                 │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use tallychain_storage::{ChainStore, Storage};
//! use tallychain_core::Block;
//!
//! let storage = Storage::open("./ledger_data").unwrap();
//! let chain = ChainStore::new(&storage);
//! chain.init_genesis(&Block::genesis()).unwrap();
//! ```

pub mod chain;
pub mod db;

// Re-export commonly used types
pub use chain::ChainStore;
pub use db::{BatchOp, KvStore, Result, SledStore, Storage, StorageError};
