//! Transport seams.
//!
//! [`PeerNetwork`] is what a node uses to reach its peers; [`PeerService`] is
//! what a node exposes to them. The HTTP transport in the node binary and the
//! in-process [`LocalNetwork`] both sit between the two.

use crate::messages::{
    HeartbeatReply, NodeId, NodeStatus, ProposalReply, SubmitReply, Vote, VoteReply,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tallychain_chain::LedgerError;
use tallychain_core::{Block, Hash, Transaction};
use thiserror::Error;

/// Failures talking to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: NodeId, reason: String },

    #[error("request to {peer} timed out after {timeout_ms}ms")]
    Timeout { peer: NodeId, timeout_ms: u64 },

    #[error("malformed response from {peer}: {reason}")]
    Decode { peer: NodeId, reason: String },

    #[error("peer {peer} could not serve request: {reason}")]
    Rejected { peer: NodeId, reason: String },
}

/// Outbound calls to peers.
///
/// Implementations do not apply timeouts themselves; callers wrap each call
/// in [`with_timeout`].
#[async_trait]
pub trait PeerNetwork: Send + Sync {
    async fn propose_block(
        &self,
        peer: &NodeId,
        proposer: &NodeId,
        block: &Block,
    ) -> Result<ProposalReply, NetworkError>;

    /// Returns the peer's acknowledgement.
    async fn vote(&self, peer: &NodeId, vote: &Vote) -> Result<bool, NetworkError>;

    async fn latest_height(&self, peer: &NodeId) -> Result<u64, NetworkError>;

    async fn sync_blocks(
        &self,
        peer: &NodeId,
        from_height: u64,
        to_height: u64,
    ) -> Result<Vec<Block>, NetworkError>;

    async fn request_vote(
        &self,
        peer: &NodeId,
        term: u64,
        candidate: &NodeId,
    ) -> Result<VoteReply, NetworkError>;

    async fn heartbeat(
        &self,
        peer: &NodeId,
        term: u64,
        leader: &NodeId,
    ) -> Result<HeartbeatReply, NetworkError>;

    async fn submit_transaction(
        &self,
        peer: &NodeId,
        tx: &Transaction,
    ) -> Result<SubmitReply, NetworkError>;
}

/// Inbound calls a node serves.
#[async_trait]
pub trait PeerService: Send + Sync {
    async fn propose_block(&self, proposer: NodeId, block: Block) -> ProposalReply;

    async fn vote(&self, vote: Vote) -> bool;

    async fn latest_height(&self) -> Result<u64, LedgerError>;

    async fn sync_blocks(&self, from_height: u64, to_height: u64)
        -> Result<Vec<Block>, LedgerError>;

    async fn request_vote(&self, term: u64, candidate: NodeId) -> VoteReply;

    async fn heartbeat(&self, term: u64, leader: NodeId) -> HeartbeatReply;

    async fn submit_transaction(&self, tx: Transaction) -> SubmitReply;

    async fn block_by_height(&self, height: u64) -> Result<Block, LedgerError>;

    async fn block_by_hash(&self, hash: Hash) -> Result<Block, LedgerError>;

    async fn latest_block(&self) -> Result<Block, LedgerError>;

    async fn status(&self) -> NodeStatus;
}

/// Run `fut` with a deadline; on expiry only this call is abandoned.
pub async fn with_timeout<T, F>(peer: &NodeId, timeout: Duration, fut: F) -> Result<T, NetworkError>
where
    F: Future<Output = Result<T, NetworkError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(NetworkError::Timeout {
            peer: peer.clone(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// In-process transport routing calls straight to registered services.
///
/// Holds weak references so a dropped node simply becomes unreachable.
#[derive(Default)]
pub struct LocalNetwork {
    nodes: RwLock<HashMap<NodeId, Weak<dyn PeerService>>>,
    down: RwLock<HashSet<NodeId>>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `service` reachable as `id`.
    pub fn register(&self, id: impl Into<NodeId>, service: Arc<dyn PeerService>) {
        self.nodes.write().insert(id.into(), Arc::downgrade(&service));
    }

    /// Simulate a crashed or partitioned peer.
    pub fn set_reachable(&self, id: &str, reachable: bool) {
        let mut down = self.down.write();
        if reachable {
            down.remove(id);
        } else {
            down.insert(id.to_string());
        }
    }

    fn service(&self, peer: &NodeId) -> Result<Arc<dyn PeerService>, NetworkError> {
        let unreachable = |reason: &str| NetworkError::PeerUnreachable {
            peer: peer.clone(),
            reason: reason.to_string(),
        };

        if self.down.read().contains(peer) {
            return Err(unreachable("marked down"));
        }
        self.nodes
            .read()
            .get(peer)
            .ok_or_else(|| unreachable("not registered"))?
            .upgrade()
            .ok_or_else(|| unreachable("stopped"))
    }
}

fn rejected(peer: &NodeId, err: LedgerError) -> NetworkError {
    NetworkError::Rejected {
        peer: peer.clone(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl PeerNetwork for LocalNetwork {
    async fn propose_block(
        &self,
        peer: &NodeId,
        proposer: &NodeId,
        block: &Block,
    ) -> Result<ProposalReply, NetworkError> {
        let service = self.service(peer)?;
        Ok(service.propose_block(proposer.clone(), block.clone()).await)
    }

    async fn vote(&self, peer: &NodeId, vote: &Vote) -> Result<bool, NetworkError> {
        let service = self.service(peer)?;
        Ok(service.vote(vote.clone()).await)
    }

    async fn latest_height(&self, peer: &NodeId) -> Result<u64, NetworkError> {
        let service = self.service(peer)?;
        service.latest_height().await.map_err(|e| rejected(peer, e))
    }

    async fn sync_blocks(
        &self,
        peer: &NodeId,
        from_height: u64,
        to_height: u64,
    ) -> Result<Vec<Block>, NetworkError> {
        let service = self.service(peer)?;
        service
            .sync_blocks(from_height, to_height)
            .await
            .map_err(|e| rejected(peer, e))
    }

    async fn request_vote(
        &self,
        peer: &NodeId,
        term: u64,
        candidate: &NodeId,
    ) -> Result<VoteReply, NetworkError> {
        let service = self.service(peer)?;
        Ok(service.request_vote(term, candidate.clone()).await)
    }

    async fn heartbeat(
        &self,
        peer: &NodeId,
        term: u64,
        leader: &NodeId,
    ) -> Result<HeartbeatReply, NetworkError> {
        let service = self.service(peer)?;
        Ok(service.heartbeat(term, leader.clone()).await)
    }

    async fn submit_transaction(
        &self,
        peer: &NodeId,
        tx: &Transaction,
    ) -> Result<SubmitReply, NetworkError> {
        let service = self.service(peer)?;
        Ok(service.submit_transaction(tx.clone()).await)
    }
}
