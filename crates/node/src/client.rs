//! HTTP client side of the peer API.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tallychain_consensus::messages::{
    BlocksResponse, ErrorResponse, HeartbeatRequest, HeightResponse, LatestBlockResponse,
    ProposeBlockRequest, RequestVoteRequest, SubmitTransactionRequest, SyncBlocksRequest, VoteAck,
    VoteRequest,
};
use tallychain_consensus::{
    HeartbeatReply, NetworkError, NodeId, NodeStatus, PeerNetwork, ProposalReply, SubmitReply,
    Vote, VoteReply,
};
use tallychain_core::{Block, Hash, Transaction, WireBlock, WireTransaction};

/// Client for one node's HTTP surface.
#[derive(Clone)]
pub struct ApiClient {
    peer: NodeId,
    base: String,
    client: Client,
    timeout: Duration,
}

impl ApiClient {
    /// `addr` may be `host:port` or a full URL.
    pub fn new(peer: impl Into<NodeId>, addr: &str, client: Client, timeout: Duration) -> Self {
        let base = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", addr.trim_end_matches('/'))
        };
        Self {
            peer: peer.into(),
            base,
            client,
            timeout,
        }
    }

    /// Standalone client with its own connection pool.
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self, NetworkError> {
        let client = build_client(addr, timeout)?;
        Ok(Self::new(addr, addr, client, timeout))
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn error(&self, err: reqwest::Error) -> NetworkError {
        if err.is_timeout() {
            NetworkError::Timeout {
                peer: self.peer.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else if err.is_decode() {
            NetworkError::Decode {
                peer: self.peer.clone(),
                reason: err.to_string(),
            }
        } else {
            NetworkError::PeerUnreachable {
                peer: self.peer.clone(),
                reason: err.to_string(),
            }
        }
    }

    async fn read<R: DeserializeOwned>(&self, resp: Response) -> Result<R, NetworkError> {
        let status = resp.status();
        if status.is_success() {
            return resp.json::<R>().await.map_err(|e| NetworkError::Decode {
                peer: self.peer.clone(),
                reason: e.to_string(),
            });
        }
        let reason = match resp.json::<ErrorResponse>().await {
            Ok(body) => format!("{}: {}", status, body.error),
            Err(_) => status.to_string(),
        };
        Err(NetworkError::Rejected {
            peer: self.peer.clone(),
            reason,
        })
    }

    async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, NetworkError> {
        let resp = self
            .client
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .map_err(|e| self.error(e))?;
        self.read(resp).await
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R, NetworkError> {
        let resp = self
            .client
            .post(format!("{}{}", self.base, path))
            .json(body)
            .send()
            .await
            .map_err(|e| self.error(e))?;
        self.read(resp).await
    }

    fn decode(&self, wire: WireBlock) -> Result<Block, NetworkError> {
        Block::try_from(wire).map_err(|e| NetworkError::Decode {
            peer: self.peer.clone(),
            reason: e.to_string(),
        })
    }

    pub async fn propose_block(&self, proposer: &NodeId, block: &Block) -> Result<ProposalReply, NetworkError> {
        let req = ProposeBlockRequest {
            proposer_id: proposer.clone(),
            block: WireBlock::from(block),
        };
        self.post("/propose", &req).await
    }

    pub async fn vote(&self, vote: &Vote) -> Result<bool, NetworkError> {
        let ack: VoteAck = self.post("/vote", &VoteRequest::from(vote)).await?;
        Ok(ack.ack)
    }

    pub async fn latest_height(&self) -> Result<u64, NetworkError> {
        let resp: HeightResponse = self.get("/height").await?;
        Ok(resp.height)
    }

    pub async fn sync_blocks(&self, from_height: u64, to_height: u64) -> Result<Vec<Block>, NetworkError> {
        let req = SyncBlocksRequest {
            from_height,
            to_height,
        };
        let resp: BlocksResponse = self.post("/sync", &req).await?;
        resp.blocks.into_iter().map(|b| self.decode(b)).collect()
    }

    pub async fn request_vote(&self, term: u64, candidate: &NodeId) -> Result<VoteReply, NetworkError> {
        let req = RequestVoteRequest {
            term,
            candidate_id: candidate.clone(),
        };
        self.post("/election/vote", &req).await
    }

    pub async fn heartbeat(&self, term: u64, leader: &NodeId) -> Result<HeartbeatReply, NetworkError> {
        let req = HeartbeatRequest {
            term,
            leader_id: leader.clone(),
        };
        self.post("/election/heartbeat", &req).await
    }

    pub async fn submit_transaction(&self, tx: &Transaction) -> Result<SubmitReply, NetworkError> {
        let req = SubmitTransactionRequest {
            transaction: WireTransaction::from(tx),
        };
        self.post("/transactions", &req).await
    }

    pub async fn latest_block(&self) -> Result<Block, NetworkError> {
        let resp: LatestBlockResponse = self.get("/blocks/latest").await?;
        self.decode(resp.block)
    }

    pub async fn block_by_height(&self, height: u64) -> Result<Block, NetworkError> {
        let wire: WireBlock = self.get(&format!("/blocks/height/{}", height)).await?;
        self.decode(wire)
    }

    pub async fn block_by_hash(&self, hash: &Hash) -> Result<Block, NetworkError> {
        let wire: WireBlock = self.get(&format!("/blocks/hash/{}", hash.to_hex())).await?;
        self.decode(wire)
    }

    pub async fn status(&self) -> Result<NodeStatus, NetworkError> {
        self.get("/status").await
    }
}

fn build_client(peer: &str, timeout: Duration) -> Result<Client, NetworkError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| NetworkError::PeerUnreachable {
            peer: peer.to_string(),
            reason: e.to_string(),
        })
}

/// [`PeerNetwork`] over HTTP, one [`ApiClient`] per configured peer.
pub struct HttpNetwork {
    peers: HashMap<NodeId, ApiClient>,
}

impl HttpNetwork {
    /// `timeout` is a transport ceiling; callers still apply their own
    /// per-call deadlines.
    pub fn new(peers: HashMap<NodeId, String>, timeout: Duration) -> Result<Self, NetworkError> {
        let client = build_client("local", timeout)?;
        let peers = peers
            .into_iter()
            .map(|(id, addr)| {
                let api = ApiClient::new(id.clone(), &addr, client.clone(), timeout);
                (id, api)
            })
            .collect();
        Ok(Self { peers })
    }

    fn peer(&self, peer: &NodeId) -> Result<&ApiClient, NetworkError> {
        self.peers.get(peer).ok_or_else(|| NetworkError::PeerUnreachable {
            peer: peer.clone(),
            reason: "no address configured".to_string(),
        })
    }
}

#[async_trait]
impl PeerNetwork for HttpNetwork {
    async fn propose_block(
        &self,
        peer: &NodeId,
        proposer: &NodeId,
        block: &Block,
    ) -> Result<ProposalReply, NetworkError> {
        self.peer(peer)?.propose_block(proposer, block).await
    }

    async fn vote(&self, peer: &NodeId, vote: &Vote) -> Result<bool, NetworkError> {
        self.peer(peer)?.vote(vote).await
    }

    async fn latest_height(&self, peer: &NodeId) -> Result<u64, NetworkError> {
        self.peer(peer)?.latest_height().await
    }

    async fn sync_blocks(
        &self,
        peer: &NodeId,
        from_height: u64,
        to_height: u64,
    ) -> Result<Vec<Block>, NetworkError> {
        self.peer(peer)?.sync_blocks(from_height, to_height).await
    }

    async fn request_vote(
        &self,
        peer: &NodeId,
        term: u64,
        candidate: &NodeId,
    ) -> Result<VoteReply, NetworkError> {
        self.peer(peer)?.request_vote(term, candidate).await
    }

    async fn heartbeat(
        &self,
        peer: &NodeId,
        term: u64,
        leader: &NodeId,
    ) -> Result<HeartbeatReply, NetworkError> {
        self.peer(peer)?.heartbeat(term, leader).await
    }

    async fn submit_transaction(
        &self,
        peer: &NodeId,
        tx: &Transaction,
    ) -> Result<SubmitReply, NetworkError> {
        self.peer(peer)?.submit_transaction(tx).await
    }
}
