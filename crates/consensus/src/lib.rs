//! Replication for tallychain.
//!
//! A small, fixed cluster agrees on one append-only chain:
//! - [`LeaderElection`] picks at most one leader per term with randomized
//!   timeouts and heartbeats.
//! - [`ConsensusEngine`] lets the leader propose blocks and commit them once
//!   more than two thirds of the cluster approve.
//! - [`RecoveryEngine`] pulls committed blocks from peers so lagging or
//!   restarted followers converge.
//! - [`Node`] wires the three together and serves peers as a [`PeerService`].
//!
//! Transport is abstracted behind [`PeerNetwork`]; [`LocalNetwork`] runs a
//! whole cluster in one process.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tallychain_chain::Ledger;
//! use tallychain_consensus::{LocalNetwork, Node, NodeOptions};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let network = LocalNetwork::new();
//! let ledger = Arc::new(Ledger::open_temporary()?);
//! let node = Node::new(NodeOptions::new("a", vec!["b".into(), "c".into()]), ledger, network.clone());
//! network.register("a", node.clone());
//! node.start();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod election;
pub mod engine;
pub mod messages;
pub mod network;
pub mod node;
pub mod recovery;
pub mod validator;

pub use config::{ConfigError, ConsensusConfig, ElectionConfig, RecoveryConfig};
pub use election::{election_majority, ElectionStatus, LeaderElection, Role};
pub use engine::{calculate_majority, ConsensusEngine, ConsensusError};
pub use messages::{
    HeartbeatReply, NodeId, NodeStatus, ProposalReply, SubmitReply, Vote, VoteReply,
};
pub use network::{with_timeout, LocalNetwork, NetworkError, PeerNetwork, PeerService};
pub use node::{Node, NodeOptions};
pub use recovery::{RecoveryEngine, RecoveryError, RecoveryStatus};
pub use validator::{BlockValidator, TransactionValidator, ValidationError};
