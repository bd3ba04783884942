//! Run a node.

use anyhow::{Context, Result};
use std::fs;
use std::sync::Arc;
use tallychain_chain::Ledger;
use tallychain_consensus::Node;
use tallychain_node::{http, HttpNetwork, RunArgs};
use tokio::net::TcpListener;
use tracing::info;

pub async fn run(args: RunArgs) -> Result<()> {
    let config = args.resolve()?;

    fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create data directory {}", config.data_dir.display()))?;
    let ledger = Ledger::open_path(&config.data_dir)
        .with_context(|| format!("Failed to open ledger in {}", config.data_dir.display()))?;
    let ledger = Arc::new(ledger);

    let transport_timeout = config
        .consensus
        .rpc_timeout()
        .max(config.recovery.rpc_timeout())
        .max(config.election.rpc_timeout());
    let network = Arc::new(HttpNetwork::new(config.peer_addresses(), transport_timeout)?);

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;

    info!(
        node = %config.node_id,
        listen = %config.listen_addr,
        data_dir = %config.data_dir.display(),
        height = ledger.height()?,
        peers = config.peers.len(),
        "Starting node"
    );

    let node = Node::new(config.options(), ledger, network);
    node.start();

    http::serve(listener, node.clone(), shutdown_signal()).await?;

    node.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
