//! Wire representation of blocks and transactions for the peer RPC surface.
//!
//! Hashes and addresses travel as lowercase hex strings, signatures as raw
//! bytes. Decoding is strict: a field that is not valid hex, or a hash that
//! is not 32 bytes, is an error rather than a silently zeroed value.

use crate::address::Address;
use crate::block::Block;
use crate::hash::Hash;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors decoding a wire value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("field `{field}` is not valid hex: {reason}")]
    InvalidHex { field: &'static str, reason: String },

    #[error("field `{field}` is not a 32-byte hash")]
    InvalidHashLength { field: &'static str },
}

/// A serialized transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireTransaction {
    pub sender: String,
    pub receiver: String,
    pub amount: f64,
    pub timestamp: i64,
    #[serde(default)]
    pub signature: Vec<u8>,
}

/// A serialized block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireBlock {
    pub height: u64,
    pub previous_hash: String,
    pub merkle_root: String,
    pub timestamp: i64,
    pub transactions: Vec<WireTransaction>,
    pub hash: String,
}

impl From<&Transaction> for WireTransaction {
    fn from(tx: &Transaction) -> Self {
        Self {
            sender: tx.sender.to_hex(),
            receiver: tx.receiver.to_hex(),
            amount: tx.amount,
            timestamp: tx.timestamp,
            signature: tx.signature.clone(),
        }
    }
}

impl TryFrom<WireTransaction> for Transaction {
    type Error = WireError;

    fn try_from(wire: WireTransaction) -> Result<Self, Self::Error> {
        Ok(Transaction {
            sender: decode_address("sender", &wire.sender)?,
            receiver: decode_address("receiver", &wire.receiver)?,
            amount: wire.amount,
            timestamp: wire.timestamp,
            signature: wire.signature,
        })
    }
}

impl From<&Block> for WireBlock {
    fn from(block: &Block) -> Self {
        Self {
            height: block.index,
            previous_hash: block.previous_hash.to_hex(),
            merkle_root: block.merkle_root.to_hex(),
            timestamp: block.timestamp,
            transactions: block.transactions.iter().map(WireTransaction::from).collect(),
            hash: block.hash.to_hex(),
        }
    }
}

impl TryFrom<WireBlock> for Block {
    type Error = WireError;

    fn try_from(wire: WireBlock) -> Result<Self, Self::Error> {
        let transactions = wire
            .transactions
            .into_iter()
            .map(Transaction::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Block {
            index: wire.height,
            timestamp: wire.timestamp,
            transactions,
            merkle_root: decode_hash("merkle_root", &wire.merkle_root)?,
            previous_hash: decode_hash("previous_hash", &wire.previous_hash)?,
            hash: decode_hash("hash", &wire.hash)?,
        })
    }
}

fn decode_address(field: &'static str, value: &str) -> Result<Address, WireError> {
    Address::from_hex(value).map_err(|e| WireError::InvalidHex {
        field,
        reason: e.to_string(),
    })
}

fn decode_hash(field: &'static str, value: &str) -> Result<Hash, WireError> {
    let bytes = hex::decode(value).map_err(|e| WireError::InvalidHex {
        field,
        reason: e.to_string(),
    })?;
    Hash::from_slice(&bytes).ok_or(WireError::InvalidHashLength { field })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> Block {
        let txs = vec![
            Transaction::new(Address::from("alice"), Address::from("bob"), 3.25, 100)
                .with_signature(vec![0x30, 0x45, 0x00, 0xff]),
            Transaction::new(Address::from("bob"), Address::from("carol"), 0.1, 101),
        ];
        Block::with_timestamp(7, 1_700_000_000, txs, Block::genesis().hash)
    }

    #[test]
    fn test_block_survives_json_transport() {
        let block = sample_block();
        let json = serde_json::to_string(&WireBlock::from(&block)).unwrap();
        let wire: WireBlock = serde_json::from_str(&json).unwrap();
        let decoded = Block::try_from(wire).unwrap();

        assert_eq!(decoded, block);
        assert!(decoded.is_valid());
    }

    #[test]
    fn test_amount_digits_survive_json_transport() {
        // Needs every significant digit back to keep the transaction hash.
        let tx = Transaction::new(Address::from("alice"), Address::from("bob"), 1175.4621790330661, 100);
        let json = serde_json::to_string(&WireTransaction::from(&tx)).unwrap();
        let wire: WireTransaction = serde_json::from_str(&json).unwrap();
        let decoded = Transaction::try_from(wire).unwrap();

        assert_eq!(decoded.amount.to_bits(), tx.amount.to_bits());
        assert_eq!(decoded.hash(), tx.hash());
    }

    #[test]
    fn test_hashes_are_hex_on_the_wire() {
        let block = sample_block();
        let wire = WireBlock::from(&block);
        assert_eq!(wire.hash, block.hash.to_hex());
        assert_eq!(wire.transactions[0].sender, hex::encode("alice"));
    }

    #[test]
    fn test_bad_hex_is_rejected() {
        let mut wire = WireBlock::from(&sample_block());
        wire.merkle_root = "not-hex".into();
        assert!(matches!(
            Block::try_from(wire),
            Err(WireError::InvalidHex {
                field: "merkle_root",
                ..
            })
        ));
    }

    #[test]
    fn test_short_hash_is_rejected() {
        let mut wire = WireBlock::from(&sample_block());
        wire.hash = "abcd".into();
        assert!(matches!(
            Block::try_from(wire),
            Err(WireError::InvalidHashLength { field: "hash" })
        ));
    }

    #[test]
    fn test_bad_transaction_address_is_rejected() {
        let mut wire = WireTransaction::from(&sample_block().transactions[0]);
        wire.receiver = "zz".into();
        assert!(Transaction::try_from(wire).is_err());
    }
}
