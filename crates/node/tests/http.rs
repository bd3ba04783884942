use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tallychain_chain::Ledger;
use tallychain_consensus::{
    ConsensusConfig, ElectionConfig, LocalNetwork, Node, NodeOptions, RecoveryConfig,
};
use tallychain_core::{Address, Block, Transaction, WireBlock, WireTransaction};
use tallychain_node::{http, ApiClient, HttpNetwork};
use tokio::net::TcpListener;
use tokio::time::{sleep, Instant};
use tower::ServiceExt;

fn app() -> (Router, Arc<Node>) {
    let network = LocalNetwork::new();
    let ledger = Arc::new(Ledger::open_temporary().unwrap());
    let node = Node::new(NodeOptions::new("a", vec!["b".into()]), ledger, network.clone());
    network.register("a", node.clone());
    (http::router(node.clone()), node)
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn transfer(amount: f64) -> Transaction {
    Transaction::new(Address::from("alice"), Address::from("bob"), amount, 1_700_000_000)
}

#[tokio::test]
async fn test_health_and_status() {
    let (app, _node) = app();

    let (status, body) = call(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = call(&app, Method::GET, "/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["node_id"], "a");
    assert_eq!(body["role"], "follower");
    assert_eq!(body["height"], 0);
}

#[tokio::test]
async fn test_block_queries() {
    let (app, _node) = app();
    let genesis = Block::genesis();

    let (status, body) = call(&app, Method::GET, "/height", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["height"], 0);

    let (status, body) = call(&app, Method::GET, "/blocks/latest", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["height"], 0);
    assert_eq!(body["block"]["hash"], genesis.hash.to_hex());

    let (status, body) = call(&app, Method::GET, "/blocks/height/0", None).await;
    assert_eq!(status, StatusCode::OK);
    let wire: WireBlock = serde_json::from_value(body).unwrap();
    assert_eq!(Block::try_from(wire).unwrap(), genesis);

    let uri = format!("/blocks/hash/{}", genesis.hash.to_hex());
    let (status, _) = call(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, Method::GET, "/blocks/height/7", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = call(&app, Method::GET, "/blocks/hash/not-hex", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &app,
        Method::POST,
        "/sync",
        Some(json!({ "from_height": 0, "to_height": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["blocks"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_submit_transaction() {
    let (app, node) = app();

    let body = json!({ "transaction": WireTransaction::from(&transfer(2.5)) });
    let (status, reply) = call(&app, Method::POST, "/transactions", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["accepted"], true);
    assert!(reply["tx_hash"].is_string());
    assert_eq!(node.engine().pending_transactions(), 1);

    let body = json!({ "transaction": WireTransaction::from(&transfer(-1.0)) });
    let (status, reply) = call(&app, Method::POST, "/transactions", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["accepted"], false);

    let body = json!({ "transaction": { "sender": "zz", "receiver": "00", "amount": 1.0, "timestamp": 0 } });
    let (status, _) = call(&app, Method::POST, "/transactions", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_proposal_and_vote_endpoints() {
    let (app, _node) = app();
    let genesis = Block::genesis();

    let good = Block::new(1, vec![transfer(1.0)], genesis.hash);
    let body = json!({ "proposer_id": "b", "block": WireBlock::from(&good) });
    let (status, reply) = call(&app, Method::POST, "/propose", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["accepted"], true);

    let bad = Block::new(0, vec![transfer(1.0)], genesis.hash);
    let body = json!({ "proposer_id": "b", "block": WireBlock::from(&bad) });
    let (_, reply) = call(&app, Method::POST, "/propose", Some(body)).await;
    assert_eq!(reply["accepted"], false);

    // Not the leader, so the vote is not acknowledged.
    let body = json!({ "voter_id": "b", "block_hash": good.hash.to_hex(), "approve": true });
    let (status, reply) = call(&app, Method::POST, "/vote", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["ack"], false);

    let body = json!({ "voter_id": "b", "block_hash": "beef", "approve": true });
    let (status, _) = call(&app, Method::POST, "/vote", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_election_endpoints() {
    let (app, node) = app();

    let body = json!({ "term": 1, "candidate_id": "b" });
    let (_, reply) = call(&app, Method::POST, "/election/vote", Some(body)).await;
    assert_eq!(reply["vote_granted"], true);
    assert_eq!(reply["term"], 1);

    let body = json!({ "term": 1, "leader_id": "b" });
    let (_, reply) = call(&app, Method::POST, "/election/heartbeat", Some(body)).await;
    assert_eq!(reply["accepted"], true);
    assert_eq!(node.election().current_leader().as_deref(), Some("b"));

    let body = json!({ "term": 0, "leader_id": "c" });
    let (_, reply) = call(&app, Method::POST, "/election/heartbeat", Some(body)).await;
    assert_eq!(reply["accepted"], false);
}

fn fast_options(id: &str, peers: Vec<String>) -> NodeOptions {
    let mut options = NodeOptions::new(id, peers);
    options.election = ElectionConfig {
        election_timeout_min_ms: 300,
        election_timeout_max_ms: 600,
        heartbeat_interval_ms: 100,
        retry_delay_min_ms: 200,
        retry_delay_max_ms: 400,
        rpc_timeout_ms: 200,
    };
    options.consensus = ConsensusConfig {
        block_interval_ms: 300,
        vote_timeout_ms: 2_000,
        rpc_timeout_ms: 500,
        ..ConsensusConfig::default()
    };
    options.recovery = RecoveryConfig {
        startup_delay_ms: 100,
        sync_interval_ms: 300,
        rpc_timeout_ms: 500,
        base_backoff_ms: 20,
        ..RecoveryConfig::default()
    };
    options
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cluster_over_http() {
    let ids = ["a", "b", "c"];
    let mut listeners = Vec::new();
    let mut addrs = HashMap::new();
    for id in ids {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        addrs.insert(id.to_string(), listener.local_addr().unwrap().to_string());
        listeners.push(listener);
    }

    let mut nodes = Vec::new();
    for (id, listener) in ids.iter().zip(listeners) {
        let peers: HashMap<String, String> = addrs
            .iter()
            .filter(|(peer, _)| peer.as_str() != *id)
            .map(|(peer, addr)| (peer.clone(), addr.clone()))
            .collect();
        let network = Arc::new(HttpNetwork::new(peers.clone(), Duration::from_secs(2)).unwrap());
        let ledger = Arc::new(Ledger::open_temporary().unwrap());
        let node = Node::new(fast_options(id, peers.into_keys().collect()), ledger, network);
        node.start();
        tokio::spawn(http::serve(listener, node.clone(), std::future::pending()));
        nodes.push(node);
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline && !nodes.iter().any(|n| n.election().is_leader()) {
        sleep(Duration::from_millis(20)).await;
    }
    assert!(nodes.iter().any(|n| n.election().is_leader()));

    // Submit through c only once it has heard from the leader.
    let client = ApiClient::connect(&addrs["c"], Duration::from_secs(2)).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut status = client.status().await.unwrap();
    while Instant::now() < deadline && status.current_leader.is_none() {
        sleep(Duration::from_millis(20)).await;
        status = client.status().await.unwrap();
    }
    assert!(status.current_leader.is_some());
    assert!(status.recovery.active);

    let reply = client.submit_transaction(&transfer(9.0)).await.unwrap();
    assert!(reply.accepted);

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut heights = Vec::new();
    while Instant::now() < deadline {
        heights.clear();
        for id in ids {
            let client = ApiClient::connect(&addrs[id], Duration::from_secs(2)).unwrap();
            heights.push(client.latest_height().await.unwrap());
        }
        if heights.iter().all(|h| *h >= 1) {
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    assert!(heights.iter().all(|h| *h >= 1), "heights: {:?}", heights);

    let expected = nodes[0].ledger().get_block_by_height(1).unwrap();
    for id in ids {
        let client = ApiClient::connect(&addrs[id], Duration::from_secs(2)).unwrap();
        assert_eq!(client.block_by_height(1).await.unwrap(), expected);
    }

    for node in &nodes {
        node.shutdown();
    }
}
