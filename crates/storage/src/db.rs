//! Key-value store abstraction, the sled backend, and typed helpers.

use sled::Db;
use std::path::Path;
use tallychain_core::Hash;
use thiserror::Error;

/// Storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Invalid genesis: {0}")]
    InvalidGenesis(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Batch operation for atomic updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Insert { key: Vec<u8>, value: Vec<u8> },
    Remove { key: Vec<u8> },
}

/// An ordered byte-map.
///
/// Implementations must apply a batch all-or-nothing.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn remove(&self, key: &[u8]) -> Result<()>;

    fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<()>;

    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    fn flush(&self) -> Result<()>;
}

/// sled-backed [`KvStore`].
pub struct SledStore {
    db: Db,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }
}

impl KvStore for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.insert(key, value)?;
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        self.db.remove(key)?;
        Ok(())
    }

    /// Atomicity comes from sled's `apply_batch`: the operations are collected
    /// in memory and written through sled's write-ahead log in one step.
    fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let mut batch = sled::Batch::default();
        for op in ops {
            match op {
                BatchOp::Insert { key, value } => batch.insert(key, value),
                BatchOp::Remove { key } => batch.remove(key),
            }
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.db
            .scan_prefix(prefix)
            .map(|entry| {
                let (k, v) = entry?;
                Ok((k.to_vec(), v.to_vec()))
            })
            .collect()
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

/// Typed wrapper around a [`KvStore`] with bincode serialization helpers.
pub struct Storage {
    store: Box<dyn KvStore>,
}

impl Storage {
    /// Open a sled database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::with_store(SledStore::open(path)?))
    }

    /// Open an in-memory sled database (for testing).
    pub fn open_temporary() -> Result<Self> {
        Ok(Self::with_store(SledStore::open_temporary()?))
    }

    /// Wrap any key-value backend.
    pub fn with_store<S: KvStore + 'static>(store: S) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    /// Store a serializable value.
    pub fn put<K, V>(&self, key: K, value: &V) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: serde::Serialize,
    {
        let encoded = bincode::serialize(value)?;
        self.store.put(key.as_ref(), &encoded)
    }

    /// Retrieve and deserialize a value.
    pub fn get<K, V>(&self, key: K) -> Result<Option<V>>
    where
        K: AsRef<[u8]>,
        V: serde::de::DeserializeOwned,
    {
        match self.store.get(key.as_ref())? {
            Some(bytes) => {
                let value = bincode::deserialize(&bytes)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Retrieve a value, returning error if not found.
    pub fn get_or_err<K, V>(&self, key: K) -> Result<V>
    where
        K: AsRef<[u8]>,
        V: serde::de::DeserializeOwned,
    {
        let key = key.as_ref();
        self.get(key)?
            .ok_or_else(|| StorageError::NotFound(String::from_utf8_lossy(key).into_owned()))
    }

    /// Delete a key.
    pub fn delete<K: AsRef<[u8]>>(&self, key: K) -> Result<()> {
        self.store.remove(key.as_ref())
    }

    /// Check if a key exists.
    pub fn contains<K: AsRef<[u8]>>(&self, key: K) -> Result<bool> {
        Ok(self.store.get(key.as_ref())?.is_some())
    }

    /// Keys (and raw values) under a prefix. Only used for cold-start recovery.
    pub fn scan_prefix<K: AsRef<[u8]>>(&self, prefix: K) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.store.scan_prefix(prefix.as_ref())
    }

    /// Apply multiple operations atomically.
    pub fn batch(&self, operations: Vec<BatchOp>) -> Result<()> {
        self.store.apply_batch(operations)
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }

    /// Build a batch insert of a serialized value.
    pub fn insert_op<V: serde::Serialize>(key: Vec<u8>, value: &V) -> Result<BatchOp> {
        Ok(BatchOp::Insert {
            key,
            value: bincode::serialize(value)?,
        })
    }

    // =========================================================================
    // Key Construction Helpers
    // =========================================================================

    /// Prefix shared by every height index entry.
    pub const BLOCK_HEIGHT_PREFIX: &'static [u8] = b"block:height:";

    /// Create a prefixed key for blocks by height.
    /// Format: "block:height:{height}"
    pub fn block_height_key(height: u64) -> Vec<u8> {
        format!("block:height:{}", height).into_bytes()
    }

    /// Parse the height back out of a height index key.
    pub fn parse_block_height_key(key: &[u8]) -> Option<u64> {
        let suffix = key.strip_prefix(Self::BLOCK_HEIGHT_PREFIX)?;
        std::str::from_utf8(suffix).ok()?.parse().ok()
    }

    /// Create a prefixed key for blocks by hash.
    /// Format: "block:hash:" + hash_bytes
    pub fn block_hash_key(hash: &Hash) -> Vec<u8> {
        let mut key = b"block:hash:".to_vec();
        key.extend_from_slice(&hash.0);
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_temporary() {
        let storage = Storage::open_temporary().unwrap();
        assert!(storage.scan_prefix("").unwrap().is_empty());
    }

    #[test]
    fn test_put_get() {
        let storage = Storage::open_temporary().unwrap();

        storage.put("key1", &42u64).unwrap();

        let value: Option<u64> = storage.get("key1").unwrap();
        assert_eq!(value, Some(42));

        let missing: Option<u64> = storage.get("missing").unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn test_get_or_err() {
        let storage = Storage::open_temporary().unwrap();

        storage.put("exists", &100u64).unwrap();

        let value: u64 = storage.get_or_err("exists").unwrap();
        assert_eq!(value, 100);

        let result: Result<u64> = storage.get_or_err("missing");
        assert!(matches!(result, Err(StorageError::NotFound(k)) if k == "missing"));
    }

    #[test]
    fn test_delete() {
        let storage = Storage::open_temporary().unwrap();

        storage.put("key", &"value").unwrap();
        assert!(storage.contains("key").unwrap());

        storage.delete("key").unwrap();
        assert!(!storage.contains("key").unwrap());
    }

    #[test]
    fn test_batch_operations() {
        let storage = Storage::open_temporary().unwrap();
        storage.put("stale", &0u64).unwrap();

        let ops = vec![
            Storage::insert_op(b"a".to_vec(), &1u64).unwrap(),
            Storage::insert_op(b"b".to_vec(), &2u64).unwrap(),
            BatchOp::Remove {
                key: b"stale".to_vec(),
            },
        ];
        storage.batch(ops).unwrap();

        let a: u64 = storage.get("a").unwrap().unwrap();
        let b: u64 = storage.get("b").unwrap().unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert!(!storage.contains("stale").unwrap());
    }

    #[test]
    fn test_scan_prefix_is_ordered_and_bounded() {
        let storage = Storage::open_temporary().unwrap();
        storage.put("block:height:2", &2u64).unwrap();
        storage.put("block:height:1", &1u64).unwrap();
        storage.put("chain:height", &2u64).unwrap();

        let keys: Vec<Vec<u8>> = storage
            .scan_prefix(Storage::BLOCK_HEIGHT_PREFIX)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(
            keys,
            vec![b"block:height:1".to_vec(), b"block:height:2".to_vec()]
        );
    }

    #[test]
    fn test_key_construction() {
        let hash = Hash([0xBB; 32]);

        let height_key = Storage::block_height_key(42);
        assert_eq!(height_key, b"block:height:42");
        assert_eq!(Storage::parse_block_height_key(&height_key), Some(42));
        assert_eq!(Storage::parse_block_height_key(b"block:height:x"), None);
        assert_eq!(Storage::parse_block_height_key(b"chain:height"), None);

        let hash_key = Storage::block_hash_key(&hash);
        assert!(hash_key.starts_with(b"block:hash:"));
        assert_eq!(hash_key.len(), b"block:hash:".len() + 32);
    }

    #[test]
    fn test_reopen_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = Storage::open(dir.path()).unwrap();
            storage.put("persisted", &7u64).unwrap();
            storage.flush().unwrap();
        }

        let storage = Storage::open(dir.path()).unwrap();
        let value: Option<u64> = storage.get("persisted").unwrap();
        assert_eq!(value, Some(7));
    }
}
