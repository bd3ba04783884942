//! CLI commands module.

use anyhow::Result;
use clap::Subcommand;
use std::time::Duration;
use tallychain_node::ApiClient;

mod block;
mod run;
mod status;
mod submit;

/// Client commands give up on an unresponsive node after this long.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Subcommand)]
pub enum Commands {
    /// Run a node
    Run(tallychain_node::RunArgs),
    /// Show a node's election and chain state
    Status(status::StatusArgs),
    /// Submit a transfer to a node
    Submit(submit::SubmitArgs),
    /// Inspect committed blocks
    Block(block::BlockArgs),
}

pub async fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Run(args) => run::run(args).await,
        Commands::Status(args) => status::run(args).await,
        Commands::Submit(args) => submit::run(args).await,
        Commands::Block(args) => block::run(args).await,
    }
}

fn connect(node: &str) -> Result<ApiClient> {
    Ok(ApiClient::connect(node, CLIENT_TIMEOUT)?)
}
