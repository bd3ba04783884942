//! The durable chain view and its single commit path.

use parking_lot::Mutex;
use std::path::Path;
use tallychain_core::{Block, Hash};
use tallychain_storage::{ChainStore, Storage, StorageError};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors returned by the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid block: {reason}")]
    InvalidBlock { reason: String },

    #[error("block not found: {0}")]
    NotFound(String),
}

impl LedgerError {
    fn invalid(reason: impl ToString) -> Self {
        LedgerError::InvalidBlock {
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Authoritative, durable view of the chain.
///
/// Every mutation goes through [`Ledger::add_block`], which holds the ledger
/// lock for the whole validate-then-write sequence.
pub struct Ledger {
    storage: Storage,
    commit_lock: Mutex<()>,
}

impl Ledger {
    /// Open a ledger over the given storage.
    ///
    /// Loads the persisted chain if there is one, otherwise writes genesis.
    /// A database that has blocks but lost its height pointer is repaired by
    /// scanning the height index once.
    pub fn open(storage: Storage) -> Result<Self> {
        let ledger = Self {
            storage,
            commit_lock: Mutex::new(()),
        };
        ledger.init()?;
        Ok(ledger)
    }

    /// Open a sled-backed ledger at `path`.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(Storage::open(path)?)
    }

    /// Open a ledger over a temporary database (for testing).
    pub fn open_temporary() -> Result<Self> {
        Self::open(Storage::open_temporary()?)
    }

    fn chain(&self) -> ChainStore<'_> {
        ChainStore::new(&self.storage)
    }

    fn init(&self) -> Result<()> {
        let chain = self.chain();
        let genesis = Block::genesis();

        if let Some(height) = chain.get_height()? {
            chain.check_genesis(&genesis)?;
            info!(height, "Loaded persisted ledger");
            return Ok(());
        }

        match chain.scan_height()? {
            Some(height) => {
                let block = chain
                    .get_block_by_height(height)?
                    .ok_or_else(|| LedgerError::NotFound(format!("height {}", height)))?;
                chain.check_genesis(&genesis)?;
                warn!(height, hash = %block.hash, "Height pointer missing, rebuilt from block index");
                chain.set_head(&block.hash, height)?;
            }
            None => {
                chain.init_genesis(&genesis)?;
                self.storage.flush()?;
                info!(hash = %genesis.hash, "Initialized ledger with genesis block");
            }
        }

        Ok(())
    }

    /// Current committed height.
    pub fn height(&self) -> Result<u64> {
        self.chain()
            .get_height()?
            .ok_or_else(|| LedgerError::NotFound("chain height".into()))
    }

    /// The block at the current committed height.
    pub fn latest_block(&self) -> Result<Block> {
        let height = self.height()?;
        self.get_block_by_height(height)
    }

    /// Get a block by height.
    pub fn get_block_by_height(&self, height: u64) -> Result<Block> {
        self.chain()
            .get_block_by_height(height)?
            .ok_or_else(|| LedgerError::NotFound(format!("height {}", height)))
    }

    /// Get a block by hash.
    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Block> {
        self.chain()
            .get_block_by_hash(hash)?
            .ok_or_else(|| LedgerError::NotFound(format!("hash {}", hash)))
    }

    /// Blocks in `[from, to]`, in height order, stopping at the first gap.
    pub fn get_blocks_range(&self, from: u64, to: u64) -> Result<Vec<Block>> {
        if from > to {
            return Ok(Vec::new());
        }
        Ok(self.chain().get_blocks_range(from, to)?)
    }

    /// Check if a block with this hash is committed.
    pub fn contains(&self, hash: &Hash) -> Result<bool> {
        Ok(self.chain().has_block(hash)?)
    }

    /// Validate `block` against the current head and commit it.
    ///
    /// On any validation failure nothing is written. Concurrent callers are
    /// serialized, so two blocks can never claim the same height.
    pub fn add_block(&self, block: &Block) -> Result<()> {
        let _guard = self.commit_lock.lock();

        block.validate().map_err(LedgerError::invalid)?;

        let latest = self.latest_block()?;
        block.extends(&latest).map_err(LedgerError::invalid)?;

        self.chain().commit_block(block)?;

        debug!(height = block.index, hash = %block.hash, txs = block.tx_count(), "Committed block");
        Ok(())
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        Ok(self.storage.flush()?)
    }
}
