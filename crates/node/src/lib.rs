//! tallychain node runtime.
//!
//! Serves a [`tallychain_consensus::Node`] over HTTP ([`http`]) and reaches
//! its peers the same way ([`client::HttpNetwork`]).

pub mod client;
pub mod config;
pub mod http;

pub use client::{ApiClient, HttpNetwork};
pub use config::{NodeConfig, PeerConfig, RunArgs};
