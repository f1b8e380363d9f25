//! WolfReplicaCtl - Command line client for WolfReplica nodes
//!
//! Usage:
//!   wolfreplicactl -n 10.0.0.1:7700 write 42 1 notes.txt "hello "
//!   wolfreplicactl -n 10.0.0.1:7700 commit 42 1
//!   wolfreplicactl -n 10.0.0.1:7700 assign-primary notes.txt 2=10.0.0.2:7700 3
//!   wolfreplicactl status --endpoint http://10.0.0.1:8090

use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Deserialize;

use wolfreplica::network::NetworkClient;
use wolfreplica::replication::{FileContent, Message, RemotePeer, ReplicaLocation, ReplicaPeer};

/// WolfReplica Control Tool
#[derive(Parser)]
#[command(name = "wolfreplicactl")]
#[command(about = "Drive and inspect WolfReplica nodes", long_about = None)]
struct Cli {
    /// Node address for protocol commands
    #[arg(short, long, default_value = "127.0.0.1:7700")]
    node: String,

    /// Connect timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    connect_timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Buffer one fragment of a transaction
    Write {
        txn_id: u64,
        seq: u64,
        file_name: String,
        data: String,
    },
    /// Read a file, including the transaction's own buffered writes
    Read {
        file_name: String,
        /// Transaction whose pending writes should be overlaid
        #[arg(long, default_value_t = 0)]
        txn_id: u64,
    },
    /// Commit a transaction with the number of fragments sent
    Commit { txn_id: u64, expected_count: u64 },
    /// Discard a transaction
    Abort { txn_id: u64 },
    /// Write, then commit, a single-fragment transaction
    Put {
        file_name: String,
        data: String,
        #[arg(long, default_value_t = 1)]
        txn_id: u64,
    },
    /// Create an empty file on the node
    CreateFile { file_name: String },
    /// Make the node primary for a file; backups are `id` or `id=address`
    AssignPrimary {
        file_name: String,
        backups: Vec<String>,
    },
    /// Check whether the node answers
    Ping,
    /// Show node status from the HTTP API
    Status {
        /// HTTP API endpoint
        #[arg(short, long, default_value = "http://127.0.0.1:8090")]
        endpoint: String,
    },
}

// ============ API Response Types ============

#[derive(Debug, Deserialize)]
struct StatusResponse {
    node_id: u32,
    #[serde(default)]
    address: String,
    alive: bool,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    transactions: Vec<TransactionInfo>,
    #[serde(default)]
    primaries: Vec<PrimaryInfo>,
    #[serde(default)]
    reported_at: String,
}

#[derive(Debug, Deserialize)]
struct TransactionInfo {
    txn_id: u64,
    file_name: String,
    fragments: usize,
    idle_secs: u64,
}

#[derive(Debug, Deserialize)]
struct PrimaryInfo {
    file_name: String,
    backups: Vec<ReplicaLocation>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let client = NetworkClient::new(Duration::from_millis(cli.connect_timeout_ms), None);
    let node = cli.node.as_str();

    match cli.command {
        Commands::Write { txn_id, seq, file_name, data } => {
            let content = FileContent::new(file_name, data);
            expect_ok(client.call(node, Message::Write { txn_id, seq, content }).await?)?;
            println!("Buffered fragment {} of transaction {}", seq, txn_id);
        }
        Commands::Read { file_name, txn_id } => {
            match client.call(node, Message::Read { txn_id, file_name }).await? {
                Message::Content(content) => print!("{}", content.data),
                other => bail!("unexpected reply: {}", other.type_name()),
            }
        }
        Commands::Commit { txn_id, expected_count } => {
            expect_ok(client.call(node, Message::Commit { txn_id, expected_count }).await?)?;
            println!("Committed transaction {}", txn_id);
        }
        Commands::Abort { txn_id } => {
            expect_ok(client.call(node, Message::Abort { txn_id }).await?)?;
            println!("Aborted transaction {}", txn_id);
        }
        Commands::Put { file_name, data, txn_id } => {
            let content = FileContent::new(file_name.clone(), data);
            expect_ok(client.call(node, Message::Write { txn_id, seq: 1, content }).await?)?;
            expect_ok(client.call(node, Message::Commit { txn_id, expected_count: 1 }).await?)
                .with_context(|| format!("commit of {} failed", file_name))?;
            println!("Appended to {}", file_name);
        }
        Commands::CreateFile { file_name } => {
            peer(node, client).create_file(&file_name).await?;
            println!("Created {}", file_name);
        }
        Commands::AssignPrimary { file_name, backups } => {
            let backups = backups
                .iter()
                .map(|b| parse_backup(b))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let order: Vec<String> = backups.iter().map(|b| b.to_string()).collect();
            expect_ok(client.call(node, Message::AssignPrimary { file_name: file_name.clone(), backups }).await?)?;
            println!("{} is primary for {} (backups: {})", node, file_name, order.join(", "));
        }
        Commands::Ping => {
            if peer(node, client).is_alive().await? {
                println!("{} is alive", node);
            } else {
                println!("{} reports not alive", node);
            }
        }
        Commands::Status { endpoint } => show_status(&endpoint).await?,
    }

    Ok(())
}

/// Peer handle for the target node; its replica id is not known here
fn peer(node: &str, client: NetworkClient) -> RemotePeer {
    RemotePeer::new(ReplicaLocation::new(0, node), node.to_string(), client)
}

fn expect_ok(reply: Message) -> anyhow::Result<()> {
    match reply {
        Message::Ok => Ok(()),
        other => bail!("unexpected reply: {}", other.type_name()),
    }
}

/// `3` or `3=10.0.0.3:7700`
fn parse_backup(arg: &str) -> anyhow::Result<ReplicaLocation> {
    let (id, address) = match arg.split_once('=') {
        Some((id, address)) => (id, address),
        None => (arg, ""),
    };
    let id: u32 = id
        .trim()
        .parse()
        .with_context(|| format!("invalid replica id in '{}'", arg))?;
    Ok(ReplicaLocation::new(id, address.trim()))
}

async fn show_status(endpoint: &str) -> anyhow::Result<()> {
    let url = format!("{}/status", endpoint.trim_end_matches('/'));
    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to reach {}", url))?;
    if !response.status().is_success() {
        bail!("{} returned {}", url, response.status());
    }
    let status: StatusResponse = response.json().await.context("malformed status response")?;

    println!();
    println!("Replica{} {}", status.node_id, status.address);
    println!("  Alive:        {}", if status.alive { "yes" } else { "no" });
    println!("  Reported at:  {}", status.reported_at);
    println!();

    println!("Files ({}):", status.files.len());
    for file in &status.files {
        println!("  {}", file);
    }
    println!();

    println!("Primary for ({}):", status.primaries.len());
    for primary in &status.primaries {
        let backups: Vec<String> = primary.backups.iter().map(|b| b.to_string()).collect();
        println!("  {:<24} -> {}", primary.file_name, backups.join(", "));
    }
    println!();

    println!("Open transactions ({}):", status.transactions.len());
    println!("  {:<10} {:<24} {:>9} {:>8}", "TXN", "FILE", "FRAGMENTS", "IDLE");
    for txn in &status.transactions {
        println!(
            "  {:<10} {:<24} {:>9} {:>7}s",
            txn.txn_id, txn.file_name, txn.fragments, txn.idle_secs
        );
    }
    println!();
    Ok(())
}
