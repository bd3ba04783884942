//! Propose → vote → commit.
//!
//! The leader batches pending transactions into a block, broadcasts it, and
//! counts approvals. Once `calculate_majority(n)` nodes (itself included)
//! have approved, the block goes through [`Ledger::add_block`]. Followers
//! only validate and vote; they learn about commits through recovery sync.

use crate::config::ConsensusConfig;
use crate::election::{LeaderElection, Role};
use crate::messages::{NodeId, ProposalReply, Vote};
use crate::network::{with_timeout, PeerNetwork};
use crate::validator::{BlockValidator, TransactionValidator, ValidationError};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tallychain_chain::{Ledger, LedgerError, Mempool, MempoolConfig, MempoolError};
use tallychain_core::{Block, Hash, Transaction};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Errors that can occur during consensus operations.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("node is not the leader")]
    NotLeader,

    #[error("invalid transaction: {0}")]
    InvalidTransaction(ValidationError),

    #[error("invalid block: {0}")]
    InvalidBlock(ValidationError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("mempool error: {0}")]
    Mempool(#[from] MempoolError),
}

pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Approvals needed to commit in a cluster of `cluster_size` nodes.
///
/// Strictly more than two thirds.
pub fn calculate_majority(cluster_size: usize) -> usize {
    2 * cluster_size / 3 + 1
}

struct PendingProposal {
    block: Block,
    approvals: HashSet<NodeId>,
    proposed_at: Instant,
}

/// Block production and vote tallying for one node.
pub struct ConsensusEngine {
    node_id: NodeId,
    config: ConsensusConfig,
    ledger: Arc<Ledger>,
    election: Arc<LeaderElection>,
    network: Arc<dyn PeerNetwork>,
    mempool: Mutex<Mempool>,
    proposals: Mutex<HashMap<Hash, PendingProposal>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl ConsensusEngine {
    /// Create an engine and subscribe it to role changes: pending tallies are
    /// dropped as soon as the node stops being leader.
    pub fn new(
        config: ConsensusConfig,
        mempool: MempoolConfig,
        ledger: Arc<Ledger>,
        election: Arc<LeaderElection>,
        network: Arc<dyn PeerNetwork>,
    ) -> Arc<Self> {
        let engine = Arc::new(Self {
            node_id: election.node_id().clone(),
            config,
            ledger,
            election: Arc::clone(&election),
            network,
            mempool: Mutex::new(Mempool::with_config(mempool)),
            proposals: Mutex::new(HashMap::new()),
            ticker: Mutex::new(None),
        });

        let weak = Arc::downgrade(&engine);
        election.on_role_change(move |role| {
            if role != Role::Leader {
                if let Some(engine) = weak.upgrade() {
                    engine.clear_pending();
                }
            }
        });

        engine
    }

    pub fn commit_majority(&self) -> usize {
        calculate_majority(self.election.cluster_size())
    }

    pub fn pending_transactions(&self) -> usize {
        self.mempool.lock().len()
    }

    /// Pending transactions, oldest first.
    pub fn pending(&self) -> Vec<Transaction> {
        self.mempool.lock().get_pending(usize::MAX)
    }

    /// Drop pending transactions, e.g. ones committed in a block learned
    /// through sync. Returns how many were pending.
    pub fn remove_transactions(&self, tx_hashes: &[Hash]) -> usize {
        self.mempool.lock().remove_batch(tx_hashes)
    }

    pub fn pending_proposals(&self) -> usize {
        self.proposals.lock().len()
    }

    /// Approvals counted so far for a pending proposal.
    pub fn approvals(&self, block_hash: &Hash) -> Option<usize> {
        self.proposals
            .lock()
            .get(block_hash)
            .map(|p| p.approvals.len())
    }

    /// Queue a transaction for the next proposal.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<Hash> {
        TransactionValidator::validate_transaction(&tx)
            .map_err(ConsensusError::InvalidTransaction)?;
        let hash = self.mempool.lock().add(tx)?;
        debug!(node = %self.node_id, tx = %hash, "Transaction queued");
        Ok(hash)
    }

    // =========================================================================
    // Leader side
    // =========================================================================

    /// Build the next block from pending transactions and put it to a vote.
    ///
    /// Returns `Ok(None)` when there is nothing to do: a proposal is still
    /// collecting votes, or fewer than `min_batch_size` transactions wait.
    pub fn propose_new_block(self: &Arc<Self>) -> Result<Option<Hash>> {
        if !self.election.is_leader() {
            return Err(ConsensusError::NotLeader);
        }
        if self.pending_proposals() > 0 {
            debug!(node = %self.node_id, "Previous proposal still collecting votes");
            return Ok(None);
        }

        let transactions = self.mempool.lock().get_pending(self.config.max_batch_size);
        if transactions.len() < self.config.min_batch_size {
            return Ok(None);
        }

        let parent = self.ledger.latest_block()?;
        let block = Block::new(parent.index + 1, transactions, parent.hash);
        let hash = block.hash;
        let majority = self.commit_majority();

        let reached = {
            let mut proposals = self.proposals.lock();
            if !proposals.is_empty() {
                return Ok(None);
            }
            let approvals = HashSet::from([self.node_id.clone()]);
            let reached = approvals.len() >= majority;
            proposals.insert(
                hash,
                PendingProposal {
                    block: block.clone(),
                    approvals,
                    proposed_at: Instant::now(),
                },
            );
            reached
        };

        info!(
            node = %self.node_id,
            height = block.index,
            hash = %hash,
            txs = block.tx_count(),
            majority,
            "Proposed block"
        );

        if reached {
            self.commit_block(&hash)?;
            return Ok(Some(hash));
        }

        self.broadcast_proposal(&block);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.wait_for_consensus(hash).await;
        });

        Ok(Some(hash))
    }

    /// Send the proposal to every peer independently.
    fn broadcast_proposal(self: &Arc<Self>, block: &Block) {
        for peer in self.election.peers() {
            let this = Arc::clone(self);
            let peer = peer.clone();
            let block = block.clone();
            tokio::spawn(async move {
                let result = with_timeout(
                    &peer,
                    this.config.rpc_timeout(),
                    this.network.propose_block(&peer, &this.node_id, &block),
                )
                .await;
                match result {
                    Ok(reply) if reply.accepted => {
                        debug!(node = %this.node_id, %peer, height = block.index, "Proposal accepted")
                    }
                    Ok(reply) => warn!(
                        node = %this.node_id,
                        %peer,
                        height = block.index,
                        reason = %reply.message,
                        "Proposal rejected"
                    ),
                    Err(e) => warn!(node = %this.node_id, %peer, error = %e, "Proposal not delivered"),
                }
            });
        }
    }

    /// Count a vote; commits when the proposal reaches the majority.
    ///
    /// Returns whether the vote matched a pending proposal. Each node counts
    /// once per block, and only cluster members count at all.
    pub fn process_vote(&self, vote: Vote) -> Result<bool> {
        if !self.election.is_leader() {
            return Err(ConsensusError::NotLeader);
        }
        if !vote.approve {
            debug!(node = %self.node_id, voter = %vote.voter_id, block = %vote.block_hash, "Disapproval noted");
            return Ok(true);
        }
        if !self.election.peers().contains(&vote.voter_id) {
            warn!(node = %self.node_id, voter = %vote.voter_id, "Vote from unknown node ignored");
            return Ok(false);
        }

        let majority = self.commit_majority();
        let reached = {
            let mut proposals = self.proposals.lock();
            let Some(proposal) = proposals.get_mut(&vote.block_hash) else {
                debug!(node = %self.node_id, block = %vote.block_hash, "Vote for unknown proposal");
                return Ok(false);
            };
            proposal.approvals.insert(vote.voter_id.clone());
            debug!(
                node = %self.node_id,
                voter = %vote.voter_id,
                approvals = proposal.approvals.len(),
                majority,
                "Vote counted"
            );
            proposal.approvals.len() >= majority
        };

        if reached {
            self.commit_block(&vote.block_hash)?;
        }
        Ok(true)
    }

    /// Commit a pending proposal through the ledger.
    ///
    /// Returns `Ok(false)` if the proposal is no longer pending (already
    /// committed, expired, or cleared).
    pub fn commit_block(&self, block_hash: &Hash) -> Result<bool> {
        let removed = self.proposals.lock().remove(block_hash);
        let Some(proposal) = removed else {
            return Ok(false);
        };

        let block = &proposal.block;
        if let Err(e) = self.ledger.add_block(block) {
            warn!(node = %self.node_id, height = block.index, hash = %block.hash, error = %e, "Commit rejected by ledger");
            return Err(e.into());
        }

        self.mempool.lock().remove_batch(&block.tx_hashes());
        info!(
            node = %self.node_id,
            height = block.index,
            hash = %block.hash,
            votes = proposal.approvals.len(),
            elapsed_ms = proposal.proposed_at.elapsed().as_millis() as u64,
            "Committed block"
        );
        Ok(true)
    }

    /// Discard the proposal if it is still pending after the vote timeout.
    ///
    /// Returns `false` if it had to be discarded.
    pub async fn wait_for_consensus(&self, block_hash: Hash) -> bool {
        sleep(self.config.vote_timeout()).await;

        let expired = self.proposals.lock().remove(&block_hash);
        match expired {
            Some(proposal) => {
                warn!(
                    node = %self.node_id,
                    height = proposal.block.index,
                    hash = %block_hash,
                    votes = proposal.approvals.len(),
                    needed = self.commit_majority(),
                    "Proposal timed out without majority"
                );
                false
            }
            None => true,
        }
    }

    /// Drop every pending tally. Their transactions stay in the mempool.
    pub fn clear_pending(&self) {
        let dropped = self.proposals.lock().drain().count();
        if dropped > 0 {
            info!(node = %self.node_id, dropped, "Cleared pending proposals");
        }
    }

    // =========================================================================
    // Follower side
    // =========================================================================

    /// Validate a proposal and, if it passes, send an approval to the proposer.
    ///
    /// Never commits locally.
    pub fn process_block_proposal(self: &Arc<Self>, proposer: NodeId, block: Block) -> ProposalReply {
        if let Err(e) = BlockValidator::validate_proposal(&block) {
            warn!(node = %self.node_id, %proposer, height = block.index, error = %e, "Rejected proposal");
            return ProposalReply::rejected(ConsensusError::InvalidBlock(e).to_string());
        }

        let vote = Vote::approve(block.hash, self.node_id.clone());
        let this = Arc::clone(self);
        let to = proposer.clone();
        tokio::spawn(async move {
            let result = with_timeout(&to, this.config.rpc_timeout(), this.network.vote(&to, &vote)).await;
            match result {
                Ok(ack) => debug!(node = %this.node_id, leader = %to, ack, "Vote delivered"),
                Err(e) => warn!(node = %this.node_id, leader = %to, error = %e, "Vote not delivered"),
            }
        });

        debug!(node = %self.node_id, %proposer, height = block.index, "Approved proposal");
        ProposalReply::accepted(format!("block {} approved", block.index))
    }

    // =========================================================================
    // Background task
    // =========================================================================

    /// Start proposing every `block_interval` while leader.
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.block_interval());
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !this.election.is_leader() {
                    continue;
                }
                if let Err(e) = this.propose_new_block() {
                    warn!(node = %this.node_id, error = %e, "Block proposal failed");
                }
            }
        });
        if let Some(old) = self.ticker.lock().replace(handle) {
            old.abort();
        }
    }

    pub fn stop(&self) {
        if let Some(handle) = self.ticker.lock().take() {
            handle.abort();
        }
    }
}
