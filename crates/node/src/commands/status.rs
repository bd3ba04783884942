//! Node status command.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use tallychain_consensus::Role;

#[derive(Args)]
pub struct StatusArgs {
    /// Node address
    #[arg(short, long, default_value = "127.0.0.1:7001")]
    node: String,
}

pub async fn run(args: StatusArgs) -> Result<()> {
    let client = super::connect(&args.node)?;
    let status = client.status().await?;

    let role = match status.role {
        Role::Leader => status.role.to_string().bright_green(),
        Role::Candidate => status.role.to_string().bright_yellow(),
        Role::Follower => status.role.to_string().normal(),
    };

    println!();
    println!("{}", "Node Status:".bold().cyan());
    println!();
    println!("  Node:          {}", status.node_id.bright_cyan());
    println!("  Role:          {}", role);
    println!("  Term:          {}", status.term);
    println!(
        "  Leader:        {}",
        status.current_leader.as_deref().unwrap_or("unknown")
    );
    println!("  Height:        {}", status.height.to_string().bright_cyan());
    println!("  Latest Hash:   {}", status.latest_hash.bright_yellow());
    println!("  Pending Txs:   {}", status.pending_transactions);
    println!("  Proposals:     {}", status.pending_proposals);
    println!(
        "  Peers:         {}",
        status.peers.join(", ").bright_black()
    );
    println!(
        "  Majorities:    election {} / commit {}",
        status.election_majority, status.commit_majority
    );
    println!(
        "  Recovery:      {} (every {} ms, {} attempts)",
        if status.recovery.active { "running".green() } else { "stopped".bright_black() },
        status.recovery.sync_interval_ms,
        status.recovery.max_retries
    );
    println!();
    Ok(())
}
