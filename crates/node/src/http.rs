//! HTTP surface of a node.
//!
//! Peers and clients talk JSON; hashes and addresses travel as hex.
//!
//! | Method | Path                   | Body                       | Reply                 |
//! |--------|------------------------|----------------------------|-----------------------|
//! | POST   | `/propose`             | `ProposeBlockRequest`      | `ProposalReply`       |
//! | POST   | `/vote`                | `VoteRequest`              | `VoteAck`             |
//! | GET    | `/height`              |                            | `HeightResponse`      |
//! | POST   | `/sync`                | `SyncBlocksRequest`        | `BlocksResponse`      |
//! | POST   | `/election/vote`       | `RequestVoteRequest`       | `VoteReply`           |
//! | POST   | `/election/heartbeat`  | `HeartbeatRequest`         | `HeartbeatReply`      |
//! | POST   | `/transactions`        | `SubmitTransactionRequest` | `SubmitReply`         |
//! | GET    | `/blocks/latest`       |                            | `LatestBlockResponse` |
//! | GET    | `/blocks/height/:n`    |                            | `WireBlock`           |
//! | GET    | `/blocks/hash/:hash`   |                            | `WireBlock`           |
//! | GET    | `/status`              |                            | `NodeStatus`          |
//! | GET    | `/health`              |                            | `{"status":"ok"}`     |

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tallychain_chain::LedgerError;
use tallychain_consensus::messages::{
    BlocksResponse, ErrorResponse, HeartbeatRequest, HeightResponse, LatestBlockResponse,
    ProposeBlockRequest, RequestVoteRequest, SubmitTransactionRequest, SyncBlocksRequest, VoteAck,
    VoteRequest,
};
use tallychain_consensus::{
    HeartbeatReply, NodeStatus, PeerService, ProposalReply, SubmitReply, Vote, VoteReply,
};
use tallychain_core::{Block, Hash, Transaction, WireBlock};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub type AppState = Arc<dyn PeerService>;

/// Failures turned into JSON error bodies.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(what) => ApiError::NotFound(format!("not found: {}", what)),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(service: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    Router::new()
        .route("/propose", post(propose_block))
        .route("/vote", post(vote))
        .route("/height", get(latest_height))
        .route("/sync", post(sync_blocks))
        .route("/election/vote", post(request_vote))
        .route("/election/heartbeat", post(heartbeat))
        .route("/transactions", post(submit_transaction))
        .route("/blocks/latest", get(latest_block))
        .route("/blocks/height/:height", get(block_by_height))
        .route("/blocks/hash/:hash", get(block_by_hash))
        .route("/status", get(status))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(service)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    service: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown)
        .await
}

fn decode_block(wire: WireBlock) -> Result<Block, ApiError> {
    Block::try_from(wire).map_err(|e| ApiError::BadRequest(e.to_string()))
}

async fn propose_block(
    State(service): State<AppState>,
    Json(req): Json<ProposeBlockRequest>,
) -> ApiResult<ProposalReply> {
    let block = decode_block(req.block)?;
    Ok(Json(service.propose_block(req.proposer_id, block).await))
}

async fn vote(State(service): State<AppState>, Json(req): Json<VoteRequest>) -> ApiResult<VoteAck> {
    let vote = Vote::try_from(req).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let ack = service.vote(vote).await;
    Ok(Json(VoteAck { ack }))
}

async fn latest_height(State(service): State<AppState>) -> ApiResult<HeightResponse> {
    let height = service.latest_height().await?;
    Ok(Json(HeightResponse { height }))
}

async fn sync_blocks(
    State(service): State<AppState>,
    Json(req): Json<SyncBlocksRequest>,
) -> ApiResult<BlocksResponse> {
    let blocks = service.sync_blocks(req.from_height, req.to_height).await?;
    Ok(Json(BlocksResponse {
        blocks: blocks.iter().map(WireBlock::from).collect(),
    }))
}

async fn request_vote(
    State(service): State<AppState>,
    Json(req): Json<RequestVoteRequest>,
) -> Json<VoteReply> {
    Json(service.request_vote(req.term, req.candidate_id).await)
}

async fn heartbeat(
    State(service): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> Json<HeartbeatReply> {
    Json(service.heartbeat(req.term, req.leader_id).await)
}

async fn submit_transaction(
    State(service): State<AppState>,
    Json(req): Json<SubmitTransactionRequest>,
) -> ApiResult<SubmitReply> {
    let tx = Transaction::try_from(req.transaction).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(service.submit_transaction(tx).await))
}

async fn latest_block(State(service): State<AppState>) -> ApiResult<LatestBlockResponse> {
    let block = service.latest_block().await?;
    Ok(Json(LatestBlockResponse {
        height: block.index,
        block: WireBlock::from(&block),
    }))
}

async fn block_by_height(
    State(service): State<AppState>,
    Path(height): Path<u64>,
) -> ApiResult<WireBlock> {
    let block = service.block_by_height(height).await?;
    Ok(Json(WireBlock::from(&block)))
}

async fn block_by_hash(
    State(service): State<AppState>,
    Path(hash): Path<String>,
) -> ApiResult<WireBlock> {
    let hash = Hash::from_hex(&hash).map_err(|e| ApiError::BadRequest(format!("invalid hash: {}", e)))?;
    let block = service.block_by_hash(hash).await?;
    Ok(Json(WireBlock::from(&block)))
}

async fn status(State(service): State<AppState>) -> Json<NodeStatus> {
    Json(service.status().await)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
