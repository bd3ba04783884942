//! A replica: ledger, election, consensus and recovery wired together and
//! exposed to peers as a [`PeerService`].

use crate::config::{ConfigError, ConsensusConfig, ElectionConfig, RecoveryConfig};
use crate::election::{LeaderElection, Role};
use crate::engine::{ConsensusEngine, ConsensusError};
use crate::messages::{HeartbeatReply, NodeId, NodeStatus, ProposalReply, SubmitReply, Vote, VoteReply};
use crate::network::{with_timeout, PeerNetwork, PeerService};
use crate::recovery::RecoveryEngine;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tallychain_chain::{Ledger, LedgerError, MempoolConfig};
use tallychain_core::{Block, Hash, Transaction};
use tracing::{debug, info, warn};

/// Everything needed to assemble a [`Node`] apart from its ledger and transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeOptions {
    pub node_id: NodeId,
    pub peers: Vec<NodeId>,
    #[serde(default)]
    pub election: ElectionConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub mempool: MempoolConfig,
}

impl NodeOptions {
    pub fn new(node_id: impl Into<NodeId>, peers: Vec<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            peers,
            election: ElectionConfig::default(),
            consensus: ConsensusConfig::default(),
            recovery: RecoveryConfig::default(),
            mempool: MempoolConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.is_empty() {
            return Err(ConfigError("node id must not be empty".into()));
        }
        if self.peers.contains(&self.node_id) {
            return Err(ConfigError(format!(
                "node {} lists itself as a peer",
                self.node_id
            )));
        }
        self.election.validate()?;
        self.consensus.validate()?;
        self.recovery.validate()
    }
}

pub struct Node {
    node_id: NodeId,
    ledger: Arc<Ledger>,
    election: Arc<LeaderElection>,
    engine: Arc<ConsensusEngine>,
    recovery: Arc<RecoveryEngine>,
    network: Arc<dyn PeerNetwork>,
    rpc_timeout: std::time::Duration,
}

impl Node {
    pub fn new(options: NodeOptions, ledger: Arc<Ledger>, network: Arc<dyn PeerNetwork>) -> Arc<Self> {
        let rpc_timeout = options.consensus.rpc_timeout();
        let election = LeaderElection::new(
            options.node_id.clone(),
            options.peers,
            options.election,
            Arc::clone(&network),
        );
        let engine = ConsensusEngine::new(
            options.consensus,
            options.mempool,
            Arc::clone(&ledger),
            Arc::clone(&election),
            Arc::clone(&network),
        );
        let recovery = RecoveryEngine::new(
            options.recovery,
            Arc::clone(&ledger),
            Arc::clone(&election),
            Arc::clone(&network),
        );

        let node_id = options.node_id;
        let id = node_id.clone();
        election.on_leader_change(move |leader| match leader {
            Some(leader) => info!(node = %id, %leader, "Leader changed"),
            None => info!(node = %id, "Leader unknown"),
        });

        // Blocks learned through sync settle whatever we still hold of them.
        let pool = Arc::clone(&engine);
        recovery.on_block_applied(move |block| {
            let removed = pool.remove_transactions(&block.tx_hashes());
            if removed > 0 {
                debug!(block = block.index, removed, "Dropped synced transactions from pool");
            }
        });

        let node = Arc::new(Self {
            node_id,
            ledger,
            election,
            engine,
            recovery,
            network,
            rpc_timeout,
        });

        let weak: Weak<Node> = Arc::downgrade(&node);
        node.election.on_leader_change(move |leader| {
            let (Some(node), Some(leader)) = (weak.upgrade(), leader) else {
                return;
            };
            if leader == node.node_id {
                return;
            }
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { node.forward_pending(leader).await });
            }
        });

        node
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn election(&self) -> &Arc<LeaderElection> {
        &self.election
    }

    pub fn engine(&self) -> &Arc<ConsensusEngine> {
        &self.engine
    }

    pub fn recovery(&self) -> &Arc<RecoveryEngine> {
        &self.recovery
    }

    /// Start the election timer, the block ticker and the recovery loop.
    pub fn start(&self) {
        self.election.start();
        self.engine.start();
        self.recovery.start();
        info!(node = %self.node_id, peers = self.election.peers().len(), "Node started");
    }

    /// Stop background tasks and flush the ledger.
    pub fn shutdown(&self) {
        self.recovery.stop();
        self.engine.stop();
        self.election.stop();
        if let Err(e) = self.ledger.flush() {
            warn!(node = %self.node_id, error = %e, "Flush on shutdown failed");
        }
        info!(node = %self.node_id, "Node stopped");
    }

    pub fn node_status(&self) -> NodeStatus {
        let election = self.election.status();
        let (height, latest_hash) = match self.ledger.latest_block() {
            Ok(block) => (block.index, block.hash.to_hex()),
            Err(_) => (0, Hash::ZERO.to_hex()),
        };
        NodeStatus {
            node_id: self.node_id.clone(),
            role: election.role,
            term: election.term,
            current_leader: election.current_leader,
            voted_for: election.voted_for,
            height,
            latest_hash,
            pending_transactions: self.engine.pending_transactions(),
            pending_proposals: self.engine.pending_proposals(),
            peers: self.election.peers().to_vec(),
            election_majority: self.election.majority(),
            commit_majority: self.engine.commit_majority(),
            recovery: self.recovery.status(),
        }
    }

    /// Hand every locally held transaction to `leader`, keeping the ones it
    /// does not accept. Returns how many were handed over.
    pub async fn forward_pending(&self, leader: NodeId) -> usize {
        let pending = self.engine.pending();
        if pending.is_empty() {
            return 0;
        }

        let mut accepted = Vec::new();
        for tx in pending {
            let forwarded = with_timeout(
                &leader,
                self.rpc_timeout,
                self.network.submit_transaction(&leader, &tx),
            )
            .await;
            match forwarded {
                Ok(reply) if reply.accepted => accepted.push(tx.hash()),
                Ok(reply) => {
                    debug!(node = %self.node_id, %leader, reason = %reply.message, "Leader refused held transaction")
                }
                Err(e) => {
                    warn!(node = %self.node_id, %leader, error = %e, "Re-forward to leader failed");
                    break;
                }
            }
        }

        let removed = self.engine.remove_transactions(&accepted);
        if removed > 0 {
            info!(node = %self.node_id, %leader, count = removed, "Re-forwarded held transactions");
        }
        removed
    }

    fn accept_locally(&self, tx: Transaction) -> SubmitReply {
        match self.engine.submit_transaction(tx) {
            Ok(hash) => SubmitReply {
                accepted: true,
                message: "transaction queued".into(),
                tx_hash: Some(hash.to_hex()),
            },
            Err(e) => SubmitReply {
                accepted: false,
                message: e.to_string(),
                tx_hash: None,
            },
        }
    }
}

#[async_trait]
impl PeerService for Node {
    async fn propose_block(&self, proposer: NodeId, block: Block) -> ProposalReply {
        if self.election.is_leader() {
            return ProposalReply::rejected(format!("{} is the leader", self.node_id));
        }
        self.engine.process_block_proposal(proposer, block)
    }

    async fn vote(&self, vote: Vote) -> bool {
        match self.engine.process_vote(vote) {
            Ok(_) => true,
            Err(ConsensusError::NotLeader) => false,
            Err(e) => {
                warn!(node = %self.node_id, error = %e, "Vote led to failed commit");
                true
            }
        }
    }

    async fn latest_height(&self) -> Result<u64, LedgerError> {
        self.ledger.height()
    }

    async fn sync_blocks(&self, from_height: u64, to_height: u64) -> Result<Vec<Block>, LedgerError> {
        self.ledger.get_blocks_range(from_height, to_height)
    }

    async fn request_vote(&self, term: u64, candidate: NodeId) -> VoteReply {
        self.election.handle_request_vote(term, &candidate)
    }

    async fn heartbeat(&self, term: u64, leader: NodeId) -> HeartbeatReply {
        self.election.handle_heartbeat(term, &leader)
    }

    /// Leaders queue the transaction; followers forward it to a known leader
    /// and fall back to queueing it themselves.
    async fn submit_transaction(&self, tx: Transaction) -> SubmitReply {
        if self.election.role() == Role::Leader {
            return self.accept_locally(tx);
        }

        if let Some(leader) = self.election.current_leader() {
            let forwarded = with_timeout(
                &leader,
                self.rpc_timeout,
                self.network.submit_transaction(&leader, &tx),
            )
            .await;
            match forwarded {
                Ok(reply) => {
                    debug!(node = %self.node_id, %leader, accepted = reply.accepted, "Forwarded transaction");
                    return reply;
                }
                Err(e) => warn!(node = %self.node_id, %leader, error = %e, "Forward to leader failed"),
            }
        }
        self.accept_locally(tx)
    }

    async fn block_by_height(&self, height: u64) -> Result<Block, LedgerError> {
        self.ledger.get_block_by_height(height)
    }

    async fn block_by_hash(&self, hash: Hash) -> Result<Block, LedgerError> {
        self.ledger.get_block_by_hash(&hash)
    }

    async fn latest_block(&self) -> Result<Block, LedgerError> {
        self.ledger.latest_block()
    }

    async fn status(&self) -> NodeStatus {
        self.node_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::LocalNetwork;
    use tallychain_core::Address;

    fn node(id: &str, peers: &[&str], network: &Arc<LocalNetwork>) -> Arc<Node> {
        let options = NodeOptions::new(id, peers.iter().map(|p| p.to_string()).collect());
        let ledger = Arc::new(Ledger::open_temporary().unwrap());
        let node = Node::new(options, ledger, network.clone());
        network.register(id, node.clone());
        node
    }

    #[test]
    fn test_options_validation() {
        assert!(NodeOptions::new("a", vec!["b".into()]).validate().is_ok());
        assert!(NodeOptions::new("", vec![]).validate().is_err());
        assert!(NodeOptions::new("a", vec!["a".into()]).validate().is_err());
    }

    #[test]
    fn test_options_from_json_use_defaults() {
        let options: NodeOptions =
            serde_json::from_str(r#"{"node_id":"a","peers":["b","c"]}"#).unwrap();
        assert_eq!(options, NodeOptions::new("a", vec!["b".into(), "c".into()]));
    }

    #[tokio::test]
    async fn test_status_of_fresh_node() {
        let network = LocalNetwork::new();
        let a = node("a", &["b", "c"], &network);

        let status = a.node_status();
        assert_eq!(status.role, Role::Follower);
        assert_eq!(status.height, 0);
        assert_eq!(status.election_majority, 2);
        assert_eq!(status.commit_majority, 3);
        assert_eq!(status.latest_hash, Block::genesis().hash.to_hex());
        assert_eq!(status.recovery.node_id, "a");
        assert_eq!(status.recovery.peers, 2);
        assert_eq!(status.recovery.max_retries, 3);
        assert!(!status.recovery.active);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["recovery"]["local_height"], 0);
    }

    #[tokio::test]
    async fn test_follower_forwards_to_leader() {
        let network = LocalNetwork::new();
        let a = node("a", &["b"], &network);
        let b = node("b", &["a"], &network);

        a.election().start_election().await;
        assert!(a.election().is_leader());
        b.election().handle_heartbeat(a.election().term(), &"a".to_string());

        let tx = Transaction::new(Address::from("alice"), Address::from("bob"), 4.0, 1);
        let reply = b.submit_transaction(tx).await;
        assert!(reply.accepted);
        assert_eq!(a.engine().pending_transactions(), 1);
        assert_eq!(b.engine().pending_transactions(), 0);
        a.election().stop();
    }

    #[tokio::test]
    async fn test_follower_without_leader_keeps_transaction() {
        let network = LocalNetwork::new();
        let a = node("a", &["b"], &network);

        let tx = Transaction::new(Address::from("alice"), Address::from("bob"), 4.0, 1);
        assert!(a.submit_transaction(tx).await.accepted);
        assert_eq!(a.engine().pending_transactions(), 1);

        let bad = Transaction::new(Address::from("alice"), Address::from("bob"), -4.0, 1);
        assert!(!a.submit_transaction(bad).await.accepted);
    }

    #[tokio::test]
    async fn test_lookups_served_from_ledger() {
        let network = LocalNetwork::new();
        let a = node("a", &[], &network);
        let genesis = Block::genesis();

        assert_eq!(a.latest_height().await.unwrap(), 0);
        assert_eq!(a.block_by_height(0).await.unwrap(), genesis);
        assert_eq!(a.block_by_hash(genesis.hash).await.unwrap(), genesis);
        assert!(a.block_by_height(4).await.is_err());
        assert_eq!(a.sync_blocks(0, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_held_transactions_follow_new_leader() {
        let network = LocalNetwork::new();
        let a = node("a", &["b"], &network);
        let b = node("b", &["a"], &network);

        // No leader yet, so b keeps it.
        let tx = Transaction::new(Address::from("alice"), Address::from("bob"), 4.0, 1);
        assert!(b.submit_transaction(tx).await.accepted);
        assert_eq!(b.engine().pending_transactions(), 1);

        a.election().start_election().await;
        assert!(a.election().is_leader());
        b.election().handle_heartbeat(a.election().term(), &"a".to_string());

        for _ in 0..50 {
            if b.engine().pending_transactions() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(a.engine().pending_transactions(), 1);
        assert_eq!(b.engine().pending_transactions(), 0);
        a.election().stop();
    }

    #[tokio::test]
    async fn test_forward_pending_to_unreachable_leader_keeps_pool() {
        let network = LocalNetwork::new();
        let a = node("a", &["b"], &network);

        let tx = Transaction::new(Address::from("alice"), Address::from("bob"), 4.0, 1);
        assert!(a.submit_transaction(tx).await.accepted);
        assert_eq!(a.forward_pending("b".into()).await, 0);
        assert_eq!(a.engine().pending_transactions(), 1);
    }
}
