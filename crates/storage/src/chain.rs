//! Block storage and chain head tracking.

use crate::db::{BatchOp, Result, Storage, StorageError};
use tallychain_core::{Block, Hash};

/// Keys for chain metadata.
const CHAIN_HEAD_KEY: &[u8] = b"chain:head";
const CHAIN_HEIGHT_KEY: &[u8] = b"chain:height";

/// Manages block records and the persisted chain head.
pub struct ChainStore<'a> {
    storage: &'a Storage,
}

impl<'a> ChainStore<'a> {
    /// Create a new ChainStore wrapping the given storage.
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    // =========================================================================
    // Block Storage
    // =========================================================================

    /// The two index records for a block.
    ///
    /// - Primary: `block:hash:{hash}` → full block data (immutable)
    /// - Secondary: `block:height:{height}` → hash
    fn block_ops(block: &Block) -> Result<Vec<BatchOp>> {
        Ok(vec![
            Storage::insert_op(Storage::block_hash_key(&block.hash), block)?,
            Storage::insert_op(Storage::block_height_key(block.index), &block.hash)?,
        ])
    }

    fn head_ops(hash: &Hash, height: u64) -> Result<Vec<BatchOp>> {
        Ok(vec![
            Storage::insert_op(CHAIN_HEAD_KEY.to_vec(), hash)?,
            Storage::insert_op(CHAIN_HEIGHT_KEY.to_vec(), &height)?,
        ])
    }

    /// Store a block's records without moving the chain head.
    pub fn put_block(&self, block: &Block) -> Result<()> {
        self.storage.batch(Self::block_ops(block)?)
    }

    /// Store a block and advance the head to it, as one atomic batch.
    ///
    /// Performs no chain validation; callers own that.
    pub fn commit_block(&self, block: &Block) -> Result<()> {
        let mut ops = Self::block_ops(block)?;
        ops.extend(Self::head_ops(&block.hash, block.index)?);
        self.storage.batch(ops)
    }

    /// Get a block by its hash.
    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<Block>> {
        let key = Storage::block_hash_key(hash);
        self.storage.get(key)
    }

    /// Get a block by its height (height → hash → block).
    pub fn get_block_by_height(&self, height: u64) -> Result<Option<Block>> {
        let height_key = Storage::block_height_key(height);
        let hash: Option<Hash> = self.storage.get(&height_key)?;

        match hash {
            Some(h) => {
                let block = self.get_block_by_hash(&h)?;
                if block.is_none() {
                    return Err(StorageError::Corrupt(format!(
                        "height {} points at missing block {}",
                        height, h
                    )));
                }
                Ok(block)
            }
            None => Ok(None),
        }
    }

    /// Check if a block exists by hash.
    pub fn has_block(&self, hash: &Hash) -> Result<bool> {
        let key = Storage::block_hash_key(hash);
        self.storage.contains(key)
    }

    // =========================================================================
    // Chain Head Tracking
    // =========================================================================

    /// Get the current chain head hash.
    pub fn get_head(&self) -> Result<Option<Hash>> {
        self.storage.get(CHAIN_HEAD_KEY)
    }

    /// Get the persisted height pointer, if any.
    pub fn get_height(&self) -> Result<Option<u64>> {
        self.storage.get(CHAIN_HEIGHT_KEY)
    }

    /// Rewrite the head pointer atomically.
    pub fn set_head(&self, hash: &Hash, height: u64) -> Result<()> {
        self.storage.batch(Self::head_ops(hash, height)?)
    }

    /// Highest height present in the height index, found by a full prefix scan.
    ///
    /// Cold-start fallback for a database whose height pointer is missing.
    pub fn scan_height(&self) -> Result<Option<u64>> {
        let mut highest = None;
        for (key, _) in self.storage.scan_prefix(Storage::BLOCK_HEIGHT_PREFIX)? {
            let height = Storage::parse_block_height_key(&key).ok_or_else(|| {
                StorageError::Corrupt(format!(
                    "malformed height key {}",
                    String::from_utf8_lossy(&key)
                ))
            })?;
            highest = highest.max(Some(height));
        }
        Ok(highest)
    }

    /// Get the block the head pointer names.
    pub fn get_latest_block(&self) -> Result<Option<Block>> {
        match self.get_head()? {
            Some(hash) => self.get_block_by_hash(&hash),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Genesis Block
    // =========================================================================

    /// Initialize the chain with a genesis block.
    ///
    /// Fails if the block is not at height 0 or the chain already has a head.
    pub fn init_genesis(&self, genesis: &Block) -> Result<()> {
        if genesis.index != 0 {
            return Err(StorageError::InvalidGenesis(
                "Genesis block must have height 0".into(),
            ));
        }

        if self.is_initialized()? {
            return Err(StorageError::InvalidGenesis(
                "Chain already initialized".into(),
            ));
        }

        self.commit_block(genesis)
    }

    /// Fail unless the stored block at height 0 is `expected`.
    pub fn check_genesis(&self, expected: &Block) -> Result<()> {
        match self.get_block_by_height(0)? {
            Some(stored) if stored.hash == expected.hash => Ok(()),
            Some(stored) => Err(StorageError::InvalidGenesis(format!(
                "stored genesis {} differs from expected {}",
                stored.hash, expected.hash
            ))),
            None => Err(StorageError::InvalidGenesis(
                "no block stored at height 0".into(),
            )),
        }
    }

    /// Check if the chain is initialized (has a head).
    pub fn is_initialized(&self) -> Result<bool> {
        Ok(self.get_head()?.is_some())
    }

    /// Get blocks in a range [from_height, to_height], stopping at the first gap.
    pub fn get_blocks_range(&self, from_height: u64, to_height: u64) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        for height in from_height..=to_height {
            match self.get_block_by_height(height)? {
                Some(block) => blocks.push(block),
                None => break,
            }
        }
        Ok(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tallychain_core::{Address, Transaction};

    fn setup() -> Storage {
        Storage::open_temporary().unwrap()
    }

    fn child_of(parent: &Block) -> Block {
        let tx = Transaction::new(
            Address::from("alice"),
            Address::from("bob"),
            1.0,
            parent.index as i64 + 1,
        );
        Block::new(parent.index + 1, vec![tx], parent.hash)
    }

    #[test]
    fn test_genesis_init() {
        let storage = setup();
        let chain = ChainStore::new(&storage);

        assert!(!chain.is_initialized().unwrap());

        let genesis = Block::genesis();
        chain.init_genesis(&genesis).unwrap();

        assert!(chain.is_initialized().unwrap());
        assert_eq!(chain.get_height().unwrap(), Some(0));
        assert_eq!(chain.get_head().unwrap(), Some(genesis.hash));
    }

    #[test]
    fn test_genesis_double_init_fails() {
        let storage = setup();
        let chain = ChainStore::new(&storage);

        let genesis = Block::genesis();
        chain.init_genesis(&genesis).unwrap();

        let result = chain.init_genesis(&genesis);
        assert!(matches!(result, Err(StorageError::InvalidGenesis(_))));
    }

    #[test]
    fn test_check_genesis() {
        let storage = setup();
        let chain = ChainStore::new(&storage);
        let genesis = Block::genesis();

        assert!(matches!(
            chain.check_genesis(&genesis),
            Err(StorageError::InvalidGenesis(_))
        ));

        chain.init_genesis(&genesis).unwrap();
        chain.check_genesis(&genesis).unwrap();

        let other = Block::with_timestamp(0, 42, genesis.transactions.clone(), Hash::ZERO);
        assert!(matches!(
            chain.check_genesis(&other),
            Err(StorageError::InvalidGenesis(_))
        ));
    }

    #[test]
    fn test_non_genesis_as_genesis_fails() {
        let storage = setup();
        let chain = ChainStore::new(&storage);

        let block = Block::new(1, vec![], Hash::ZERO);
        let result = chain.init_genesis(&block);
        assert!(matches!(result, Err(StorageError::InvalidGenesis(_))));
    }

    #[test]
    fn test_block_lookups() {
        let storage = setup();
        let chain = ChainStore::new(&storage);

        let genesis = Block::genesis();
        chain.init_genesis(&genesis).unwrap();

        let by_hash = chain.get_block_by_hash(&genesis.hash).unwrap().unwrap();
        assert_eq!(by_hash, genesis);

        let by_height = chain.get_block_by_height(0).unwrap().unwrap();
        assert_eq!(by_height, genesis);

        assert!(chain.get_block_by_height(1).unwrap().is_none());
        assert!(chain.get_block_by_hash(&Hash::ZERO).unwrap().is_none());
    }

    #[test]
    fn test_commit_moves_head() {
        let storage = setup();
        let chain = ChainStore::new(&storage);

        let genesis = Block::genesis();
        chain.init_genesis(&genesis).unwrap();

        let block1 = child_of(&genesis);
        chain.commit_block(&block1).unwrap();
        assert_eq!(chain.get_height().unwrap(), Some(1));
        assert_eq!(chain.get_latest_block().unwrap(), Some(block1.clone()));

        let block2 = child_of(&block1);
        chain.commit_block(&block2).unwrap();
        assert_eq!(chain.get_height().unwrap(), Some(2));
        assert_eq!(chain.get_head().unwrap(), Some(block2.hash));
    }

    #[test]
    fn test_put_block_leaves_head() {
        let storage = setup();
        let chain = ChainStore::new(&storage);

        let genesis = Block::genesis();
        chain.init_genesis(&genesis).unwrap();

        let block1 = child_of(&genesis);
        chain.put_block(&block1).unwrap();

        assert!(chain.has_block(&block1.hash).unwrap());
        assert_eq!(chain.get_height().unwrap(), Some(0));
    }

    #[test]
    fn test_scan_height() {
        let storage = setup();
        let chain = ChainStore::new(&storage);
        assert_eq!(chain.scan_height().unwrap(), None);

        let mut parent = Block::genesis();
        chain.put_block(&parent).unwrap();
        for _ in 0..11 {
            let block = child_of(&parent);
            chain.put_block(&block).unwrap();
            parent = block;
        }

        // Lexicographic key order would put "block:height:9" last.
        assert_eq!(chain.scan_height().unwrap(), Some(11));
        assert_eq!(chain.get_height().unwrap(), None);
    }

    #[test]
    fn test_get_blocks_range() {
        let storage = setup();
        let chain = ChainStore::new(&storage);

        let genesis = Block::genesis();
        chain.init_genesis(&genesis).unwrap();
        let block1 = child_of(&genesis);
        chain.commit_block(&block1).unwrap();
        let block2 = child_of(&block1);
        chain.commit_block(&block2).unwrap();

        let blocks = chain.get_blocks_range(0, 2).unwrap();
        let heights: Vec<u64> = blocks.iter().map(|b| b.index).collect();
        assert_eq!(heights, vec![0, 1, 2]);

        // Stops at the first missing height.
        assert_eq!(chain.get_blocks_range(1, 10).unwrap().len(), 2);
        assert!(chain.get_blocks_range(5, 10).unwrap().is_empty());
    }

    #[test]
    fn test_dangling_height_index_is_corrupt() {
        let storage = setup();
        let chain = ChainStore::new(&storage);

        storage
            .put(Storage::block_height_key(3), &Hash([0x33; 32]))
            .unwrap();
        assert!(matches!(
            chain.get_block_by_height(3),
            Err(StorageError::Corrupt(_))
        ));
    }
}
