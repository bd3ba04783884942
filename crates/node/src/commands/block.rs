//! Block inspection command.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use tallychain_core::{Block, Hash};
use tallychain_node::ApiClient;

#[derive(Args)]
pub struct BlockArgs {
    #[command(subcommand)]
    command: BlockCommand,
}

#[derive(Subcommand)]
enum BlockCommand {
    /// List recent blocks
    List {
        /// Node address
        #[arg(short, long, default_value = "127.0.0.1:7001")]
        node: String,

        /// Number of blocks to show
        #[arg(short, long, default_value = "10")]
        count: u64,
    },
    /// Show detailed block information
    Info {
        /// Node address
        #[arg(short, long, default_value = "127.0.0.1:7001")]
        node: String,

        /// Block height or hash (hex format)
        block_id: String,
    },
}

pub async fn run(args: BlockArgs) -> Result<()> {
    match args.command {
        BlockCommand::List { node, count } => list_blocks(&super::connect(&node)?, count).await,
        BlockCommand::Info { node, block_id } => {
            show_block_info(&super::connect(&node)?, &block_id).await
        }
    }
}

async fn list_blocks(client: &ApiClient, count: u64) -> Result<()> {
    let head_height = client.latest_height().await?;
    let start_height = (head_height + 1).saturating_sub(count);
    let blocks = client.sync_blocks(start_height, head_height).await?;

    println!();
    println!("{}", "Recent Blocks:".bold().cyan());
    println!();
    for block in blocks.iter().rev() {
        println!(
            "  {} {} {}",
            format!("#{}", block.index).bright_black(),
            block.hash.to_hex()[..16].bright_yellow(),
            format!("({} txs)", block.tx_count()).bright_black()
        );
    }
    println!();
    Ok(())
}

async fn show_block_info(client: &ApiClient, block_id: &str) -> Result<()> {
    // Try parsing as height first, then as hash
    let block: Block = if let Ok(height) = block_id.parse::<u64>() {
        client.block_by_height(height).await?
    } else {
        let hash = Hash::from_hex(block_id)
            .with_context(|| format!("Invalid block hash: {}", block_id))?;
        client.block_by_hash(&hash).await?
    };

    println!();
    println!("{}", "Block Information:".bold().cyan());
    println!();
    println!("  Height:       {}", block.index.to_string().bright_cyan());
    println!("  Hash:         {}", block.hash.to_hex().bright_yellow());
    println!("  Parent Hash:  {}", block.previous_hash.to_hex().bright_black());
    println!("  Merkle Root:  {}", block.merkle_root.to_hex().bright_black());
    println!("  Timestamp:    {}", block.timestamp.to_string().bright_black());
    println!("  Transactions: {}", block.tx_count().to_string().bright_cyan());
    println!();

    if !block.transactions.is_empty() {
        println!("{}", "Transactions:".bold());
        println!();
        for (i, tx) in block.transactions.iter().enumerate() {
            println!(
                "  {} {} {} -> {} {}",
                format!("{}.", i + 1).bright_black(),
                tx.hash().to_hex()[..16].bright_yellow(),
                tx.sender,
                tx.receiver,
                tx.amount.to_string().bright_cyan()
            );
        }
        println!();
    }
    Ok(())
}
