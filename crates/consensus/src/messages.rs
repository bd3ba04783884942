//! Messages exchanged between nodes.
//!
//! The reply types are shared by the in-process and HTTP transports. The
//! `*Request` / `*Response` types are the JSON bodies of the HTTP surface and
//! carry hashes as hex strings.

use crate::election::Role;
use crate::recovery::RecoveryStatus;
use serde::{Deserialize, Serialize};
use tallychain_core::{Hash, WireBlock, WireError, WireTransaction};

/// Identifier of a node in the cluster.
pub type NodeId = String;

/// One voter's verdict on a proposed block. Lives only as long as the
/// proposal's voting window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    pub block_hash: Hash,
    pub voter_id: NodeId,
    pub approve: bool,
    pub timestamp: i64,
}

impl Vote {
    pub fn approve(block_hash: Hash, voter_id: impl Into<NodeId>) -> Self {
        Self {
            block_hash,
            voter_id: voter_id.into(),
            approve: true,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Answer to a block proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalReply {
    pub accepted: bool,
    pub message: String,
}

impl ProposalReply {
    pub fn accepted(message: impl Into<String>) -> Self {
        Self {
            accepted: true,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            message: message.into(),
        }
    }
}

/// Answer to a vote request during an election.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReply {
    pub term: u64,
    pub vote_granted: bool,
}

/// Answer to a leader heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatReply {
    pub term: u64,
    pub accepted: bool,
}

/// Answer to a client transaction submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReply {
    pub accepted: bool,
    pub message: String,
    /// Hex transaction hash when accepted.
    pub tx_hash: Option<String>,
}

/// Snapshot of a node's election, chain, pool and recovery state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub role: Role,
    pub term: u64,
    pub current_leader: Option<NodeId>,
    pub voted_for: Option<NodeId>,
    pub height: u64,
    pub latest_hash: String,
    pub pending_transactions: usize,
    pub pending_proposals: usize,
    pub peers: Vec<NodeId>,
    pub election_majority: usize,
    pub commit_majority: usize,
    pub recovery: RecoveryStatus,
}

// =============================================================================
// HTTP bodies
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposeBlockRequest {
    pub proposer_id: NodeId,
    pub block: WireBlock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub voter_id: NodeId,
    pub block_hash: String,
    pub approve: bool,
    #[serde(default)]
    pub timestamp: i64,
}

impl From<&Vote> for VoteRequest {
    fn from(vote: &Vote) -> Self {
        Self {
            voter_id: vote.voter_id.clone(),
            block_hash: vote.block_hash.to_hex(),
            approve: vote.approve,
            timestamp: vote.timestamp,
        }
    }
}

impl TryFrom<VoteRequest> for Vote {
    type Error = WireError;

    fn try_from(req: VoteRequest) -> Result<Self, Self::Error> {
        let block_hash = Hash::from_hex(&req.block_hash).map_err(|e| WireError::InvalidHex {
            field: "block_hash",
            reason: e.to_string(),
        })?;
        Ok(Self {
            block_hash,
            voter_id: req.voter_id,
            approve: req.approve,
            timestamp: req.timestamp,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteAck {
    pub ack: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeightResponse {
    pub height: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncBlocksRequest {
    pub from_height: u64,
    pub to_height: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlocksResponse {
    pub blocks: Vec<WireBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestBlockResponse {
    pub height: u64,
    pub block: WireBlock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    pub term: u64,
    pub candidate_id: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub term: u64,
    pub leader_id: NodeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitTransactionRequest {
    pub transaction: WireTransaction,
}

/// Error body returned by the HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
