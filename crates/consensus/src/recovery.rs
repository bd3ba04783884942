//! Follower catch-up by pulling committed blocks from peers.

use crate::config::RecoveryConfig;
use crate::election::LeaderElection;
use crate::messages::NodeId;
use crate::network::{with_timeout, NetworkError, PeerNetwork};
use crate::validator::BlockValidator;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tallychain_chain::{Ledger, LedgerError};
use tallychain_core::Block;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("peer {peer} unreachable after {attempts} attempts: {source}")]
    PeerUnreachable {
        peer: NodeId,
        attempts: u32,
        #[source]
        source: NetworkError,
    },

    #[error("block {height} from {peer} rejected: {reason}")]
    InvalidBlock {
        peer: NodeId,
        height: u64,
        reason: String,
    },

    #[error("peer {peer} returned no blocks for heights {from}..={to}")]
    IncompleteSync { peer: NodeId, from: u64, to: u64 },

    #[error("no peer could be synced from")]
    NoPeerAvailable,

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

pub type Result<T> = std::result::Result<T, RecoveryError>;

type BlockCallback = Arc<dyn Fn(&Block) + Send + Sync>;

/// Snapshot for the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryStatus {
    pub node_id: NodeId,
    pub active: bool,
    pub peers: usize,
    pub local_height: u64,
    pub sync_interval_ms: u64,
    pub rpc_timeout_ms: u64,
    pub max_retries: u32,
}

pub struct RecoveryEngine {
    node_id: NodeId,
    peers: Vec<NodeId>,
    config: RecoveryConfig,
    ledger: Arc<Ledger>,
    election: Arc<LeaderElection>,
    network: Arc<dyn PeerNetwork>,
    applied_callbacks: Mutex<Vec<BlockCallback>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RecoveryEngine {
    pub fn new(
        config: RecoveryConfig,
        ledger: Arc<Ledger>,
        election: Arc<LeaderElection>,
        network: Arc<dyn PeerNetwork>,
    ) -> Arc<Self> {
        Arc::new(Self {
            node_id: election.node_id().clone(),
            peers: election.peers().to_vec(),
            config,
            ledger,
            election,
            network,
            applied_callbacks: Mutex::new(Vec::new()),
            task: Mutex::new(None),
        })
    }

    /// Called with every block this engine appends to the ledger.
    pub fn on_block_applied(&self, callback: impl Fn(&Block) + Send + Sync + 'static) {
        self.applied_callbacks.lock().push(Arc::new(callback));
    }

    pub fn status(&self) -> RecoveryStatus {
        RecoveryStatus {
            node_id: self.node_id.clone(),
            active: self.task.lock().is_some(),
            peers: self.peers.len(),
            local_height: self.ledger.height().unwrap_or(0),
            sync_interval_ms: self.config.sync_interval_ms,
            rpc_timeout_ms: self.config.rpc_timeout_ms,
            max_retries: self.config.max_retries,
        }
    }

    /// True if there are no peers or at least one answers a height query.
    pub async fn perform_health_check(&self) -> bool {
        if self.peers.is_empty() {
            return true;
        }
        for peer in &self.peers {
            let reply = with_timeout(
                peer,
                self.config.rpc_timeout(),
                self.network.latest_height(peer),
            )
            .await;
            if reply.is_ok() {
                debug!(node = %self.node_id, %peer, "Health check passed");
                return true;
            }
        }
        warn!(node = %self.node_id, "Health check failed: no peer reachable");
        false
    }

    /// Try peers until one sync succeeds: the known leader first, then the
    /// configured peers in order.
    ///
    /// Returns the number of blocks applied.
    pub async fn perform_recovery_sync(&self) -> Result<u64> {
        if self.peers.is_empty() {
            return Ok(0);
        }
        for peer in &self.sync_order() {
            match self.sync_with_peer(peer).await {
                Ok(applied) => {
                    if applied > 0 {
                        info!(node = %self.node_id, %peer, applied, "Recovery sync completed");
                    }
                    return Ok(applied);
                }
                Err(e) => warn!(node = %self.node_id, %peer, error = %e, "Sync with peer failed"),
            }
        }
        Err(RecoveryError::NoPeerAvailable)
    }

    fn sync_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.peers.len());
        if let Some(leader) = self.election.current_leader() {
            if self.peers.contains(&leader) {
                order.push(leader);
            }
        }
        let rest: Vec<NodeId> = self
            .peers
            .iter()
            .filter(|p| !order.contains(p))
            .cloned()
            .collect();
        order.extend(rest);
        order
    }

    /// Fetch and apply everything `peer` has above the local head.
    ///
    /// Blocks go through full validation and [`Ledger::add_block`]; the first
    /// one that fails aborts the sync, leaving earlier blocks applied.
    pub async fn sync_with_peer(&self, peer: &NodeId) -> Result<u64> {
        let remote = self
            .with_retries(peer, || self.network.latest_height(peer))
            .await?;
        let local = self.ledger.height()?;
        if remote <= local {
            debug!(node = %self.node_id, %peer, local, remote, "Up to date");
            return Ok(0);
        }

        info!(node = %self.node_id, %peer, local, remote, "Catching up");
        let mut next = local + 1;
        let mut applied = 0;
        while next <= remote {
            let to = next
                .saturating_add(self.config.max_blocks_per_request.saturating_sub(1))
                .min(remote);
            let blocks = with_timeout(
                peer,
                self.config.rpc_timeout(),
                self.network.sync_blocks(peer, next, to),
            )
            .await
            .map_err(|source| RecoveryError::PeerUnreachable {
                peer: peer.clone(),
                attempts: 1,
                source,
            })?;
            if blocks.is_empty() {
                return Err(RecoveryError::IncompleteSync {
                    peer: peer.clone(),
                    from: next,
                    to,
                });
            }

            for block in blocks {
                self.apply(peer, next, &block)?;
                next += 1;
                applied += 1;
            }
        }
        Ok(applied)
    }

    fn apply(&self, peer: &NodeId, expected: u64, block: &Block) -> Result<()> {
        let invalid = |reason: String| RecoveryError::InvalidBlock {
            peer: peer.clone(),
            height: block.index,
            reason,
        };

        if block.index != expected {
            return Err(invalid(format!("expected height {}", expected)));
        }
        BlockValidator::validate_proposal(block).map_err(|e| invalid(e.to_string()))?;
        self.ledger
            .add_block(block)
            .map_err(|e| invalid(e.to_string()))?;
        debug!(node = %self.node_id, %peer, height = block.index, "Applied synced block");

        let callbacks = self.applied_callbacks.lock().clone();
        for cb in callbacks {
            cb(block);
        }
        Ok(())
    }

    /// Up to `max_retries` attempts, waiting `backoff(i)` after attempt `i`.
    async fn with_retries<T, F, Fut>(&self, peer: &NodeId, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, NetworkError>>,
    {
        let attempts = self.config.max_retries.max(1);
        let mut attempt = 1;
        loop {
            match with_timeout(peer, self.config.rpc_timeout(), call()).await {
                Ok(value) => return Ok(value),
                Err(source) if attempt >= attempts => {
                    return Err(RecoveryError::PeerUnreachable {
                        peer: peer.clone(),
                        attempts,
                        source,
                    })
                }
                Err(e) => {
                    let delay = self.config.backoff(attempt);
                    debug!(node = %self.node_id, %peer, attempt, error = %e, ?delay, "Retrying");
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Sync once after `startup_delay` (immediately by default), then every
    /// `sync_interval` while not leader.
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            sleep(this.config.startup_delay()).await;
            this.sync_round().await;

            let mut ticker = tokio::time::interval(this.config.sync_interval());
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if this.election.is_leader() {
                    continue;
                }
                this.sync_round().await;
            }
        });
        if let Some(old) = self.task.lock().replace(handle) {
            old.abort();
        }
    }

    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    async fn sync_round(&self) {
        if let Err(e) = self.perform_recovery_sync().await {
            warn!(node = %self.node_id, error = %e, "Recovery sync failed");
        }
    }
}
