//! Transaction submission command.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tallychain_core::{Address, Transaction};

#[derive(Args)]
pub struct SubmitArgs {
    /// Node address
    #[arg(short, long, default_value = "127.0.0.1:7001")]
    node: String,

    /// Sender (name, or hex with 0x prefix)
    #[arg(short, long)]
    from: String,

    /// Receiver (name, or hex with 0x prefix)
    #[arg(short, long)]
    to: String,

    /// Amount to transfer
    #[arg(short, long)]
    amount: f64,

    /// Hex-encoded signature from the wallet
    #[arg(long)]
    signature: Option<String>,
}

fn parse_address(s: &str) -> Result<Address> {
    if s.starts_with("0x") {
        Address::from_hex(s).with_context(|| format!("Invalid address: {}", s))
    } else {
        Ok(Address::from(s))
    }
}

pub async fn run(args: SubmitArgs) -> Result<()> {
    let mut tx = Transaction::transfer(
        parse_address(&args.from)?,
        parse_address(&args.to)?,
        args.amount,
    );
    if let Some(sig) = &args.signature {
        let bytes = hex::decode(sig.trim_start_matches("0x"))
            .with_context(|| "Signature must be hex")?;
        tx = tx.with_signature(bytes);
    }

    let client = super::connect(&args.node)?;
    let reply = client.submit_transaction(&tx).await?;

    println!();
    if !reply.accepted {
        bail!("Transaction rejected: {}", reply.message);
    }
    println!("{}", "Transaction accepted".bold().green());
    println!();
    println!("  From:    {}", tx.sender.to_string().bright_yellow());
    println!("  To:      {}", tx.receiver.to_string().bright_yellow());
    println!("  Amount:  {}", tx.amount.to_string().bright_cyan());
    if let Some(hash) = reply.tx_hash {
        println!("  Hash:    {}", hash.bright_black());
    }
    println!("  Status:  {}", reply.message);
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("alice").unwrap(), Address::from("alice"));
        assert_eq!(
            parse_address("0x0a0b").unwrap(),
            Address::from_bytes(vec![0x0a, 0x0b])
        );
        assert!(parse_address("0xzz").is_err());
    }
}
