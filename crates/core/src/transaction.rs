//! Transfer transactions.

use crate::address::Address;
use crate::hash::{hash, Hash};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A value transfer between two addresses.
///
/// The signature is produced by the wallet layer and carried opaquely; it is
/// excluded from the transaction's identity hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender's address.
    pub sender: Address,
    /// Recipient's address.
    pub receiver: Address,
    /// Amount transferred. Must be strictly positive to enter a block.
    pub amount: f64,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    /// Wallet signature (opaque).
    pub signature: Vec<u8>,
}

/// Unsigned transaction data (the canonical form that is hashed).
#[derive(Serialize)]
struct UnsignedTransaction<'a> {
    sender: &'a Address,
    receiver: &'a Address,
    amount: f64,
    timestamp: i64,
}

impl Transaction {
    /// Create a new unsigned transaction.
    pub fn new(sender: Address, receiver: Address, amount: f64, timestamp: i64) -> Self {
        Self {
            sender,
            receiver,
            amount,
            timestamp,
            signature: Vec::new(),
        }
    }

    /// Create a transfer stamped with the current time.
    pub fn transfer(sender: impl Into<Address>, receiver: impl Into<Address>, amount: f64) -> Self {
        Self::new(sender.into(), receiver.into(), amount, Utc::now().timestamp())
    }

    /// Attach a wallet signature.
    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = signature;
        self
    }

    /// Identity hash: SHA-256 over every field except the signature.
    pub fn hash(&self) -> Hash {
        let unsigned = UnsignedTransaction {
            sender: &self.sender,
            receiver: &self.receiver,
            amount: self.amount,
            timestamp: self.timestamp,
        };
        let encoded = bincode::serialize(&unsigned).expect("serialization should not fail");
        hash(&encoded)
    }

    /// Check the amount is strictly positive (and a real number).
    pub fn has_positive_amount(&self) -> bool {
        self.amount > 0.0 && self.amount.is_finite()
    }

    /// Check both endpoints are present.
    pub fn has_addresses(&self) -> bool {
        !self.sender.is_empty() && !self.receiver.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transaction {
        Transaction::new(Address::from("alice"), Address::from("bob"), 12.5, 1_700_000_000)
    }

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(sample().hash(), sample().hash());
    }

    #[test]
    fn test_signature_excluded_from_hash() {
        let unsigned = sample();
        let signed = sample().with_signature(vec![1, 2, 3, 4]);
        assert_eq!(unsigned.hash(), signed.hash());
    }

    #[test]
    fn test_every_field_changes_hash() {
        let base = sample().hash();

        let mut tx = sample();
        tx.sender = Address::from("mallory");
        assert_ne!(tx.hash(), base);

        let mut tx = sample();
        tx.receiver = Address::from("carol");
        assert_ne!(tx.hash(), base);

        let mut tx = sample();
        tx.amount = 12.6;
        assert_ne!(tx.hash(), base);

        let mut tx = sample();
        tx.timestamp += 1;
        assert_ne!(tx.hash(), base);
    }

    #[test]
    fn test_positive_amount() {
        let mut tx = sample();
        assert!(tx.has_positive_amount());

        tx.amount = 0.0;
        assert!(!tx.has_positive_amount());

        tx.amount = -1.0;
        assert!(!tx.has_positive_amount());

        tx.amount = f64::NAN;
        assert!(!tx.has_positive_amount());
    }

    #[test]
    fn test_has_addresses() {
        let mut tx = sample();
        assert!(tx.has_addresses());

        tx.receiver = Address::default();
        assert!(!tx.has_addresses());
    }
}
