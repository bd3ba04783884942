//! Core ledger primitives for tallychain.
//!
//! This crate provides the data model every node must agree on:
//! - SHA-256 hashing
//! - Addresses and transfer transactions
//! - Merkle roots over transaction hashes
//! - Hash-chained blocks and their validity rules
//! - The wire representation used on the peer RPC surface

pub mod address;
pub mod block;
pub mod hash;
pub mod merkle;
pub mod transaction;
pub mod wire;

// Re-export commonly used types at the crate root
pub use address::Address;
pub use block::{Block, BlockError};
pub use hash::{hash, hash_concat, Hash, H256};
pub use merkle::merkle_root;
pub use transaction::Transaction;
pub use wire::{WireBlock, WireError, WireTransaction};
