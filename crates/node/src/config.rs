//! Node configuration: an optional JSON file overlaid with command-line flags.

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tallychain_chain::MempoolConfig;
use tallychain_consensus::{ConsensusConfig, ElectionConfig, NodeId, NodeOptions, RecoveryConfig};

/// A peer and the address its HTTP surface listens on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: NodeId,
    pub addr: String,
}

impl FromStr for PeerConfig {
    type Err = String;

    /// Parses `id=host:port`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (id, addr) = s
            .split_once('=')
            .ok_or_else(|| format!("expected ID=ADDR, got '{}'", s))?;
        if id.is_empty() || addr.is_empty() {
            return Err(format!("expected ID=ADDR, got '{}'", s));
        }
        Ok(Self {
            id: id.to_string(),
            addr: addr.to_string(),
        })
    }
}

/// Full configuration of a running node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_id: NodeId,
    pub listen_addr: String,
    pub data_dir: PathBuf,
    pub peers: Vec<PeerConfig>,
    pub election: ElectionConfig,
    pub consensus: ConsensusConfig,
    pub recovery: RecoveryConfig,
    pub mempool: MempoolConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "node-1".to_string(),
            listen_addr: "127.0.0.1:7001".to_string(),
            data_dir: PathBuf::from("./data"),
            peers: Vec::new(),
            election: ElectionConfig::default(),
            consensus: ConsensusConfig::default(),
            recovery: RecoveryConfig::default(),
            mempool: MempoolConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file {}", path.display()))
    }

    pub fn options(&self) -> NodeOptions {
        NodeOptions {
            node_id: self.node_id.clone(),
            peers: self.peers.iter().map(|p| p.id.clone()).collect(),
            election: self.election.clone(),
            consensus: self.consensus.clone(),
            recovery: self.recovery.clone(),
            mempool: self.mempool.clone(),
        }
    }

    pub fn peer_addresses(&self) -> HashMap<NodeId, String> {
        self.peers
            .iter()
            .map(|p| (p.id.clone(), p.addr.clone()))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for peer in &self.peers {
            if !seen.insert(&peer.id) {
                bail!("peer {} listed twice", peer.id);
            }
        }
        self.options()
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))
    }
}

/// Flags for `tallychain run`. Anything given here wins over the file.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Identifier of this node within the cluster
    #[arg(long)]
    pub node_id: Option<String>,

    /// Address to serve the peer API on
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Directory to store blockchain data
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Peer as ID=ADDR (repeatable); replaces the file's peer list
    #[arg(short, long = "peer", value_name = "ID=ADDR")]
    pub peers: Vec<PeerConfig>,

    /// Milliseconds between block proposals while leader
    #[arg(long)]
    pub block_interval_ms: Option<u64>,
}

impl RunArgs {
    pub fn resolve(&self) -> Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)?,
            None => NodeConfig::default(),
        };

        if let Some(id) = &self.node_id {
            config.node_id = id.clone();
        }
        if let Some(listen) = &self.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if !self.peers.is_empty() {
            config.peers = self.peers.clone();
        }
        if let Some(ms) = self.block_interval_ms {
            config.consensus.block_interval_ms = ms;
        }

        config.validate()?;
        Ok(config)
    }
}
