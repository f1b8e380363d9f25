//! WolfReplica - Replicated File Storage Node
//!
//! Runs one replica node: the TCP endpoint for clients, peers and the
//! control authority, plus the HTTP status API.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfreplica::api::HttpServer;
use wolfreplica::config::{LoggingConfig, ReplicaConfig};
use wolfreplica::error::{Error, Result};
use wolfreplica::network::NetworkServer;
use wolfreplica::node::{NodeIdentity, ReplicaServer};

/// WolfReplica - Replicated File Storage Node
#[derive(Parser)]
#[command(name = "wolfreplica")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfreplica.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the replica node
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfreplica.toml")]
        output: PathBuf,

        /// Replica ID
        #[arg(long, default_value_t = 1)]
        node_id: u32,

        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0:7700")]
        bind: String,
    },

    /// Validate configuration file
    Validate,

    /// Show node information
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging settings come from the config file when it is readable
    let logging = ReplicaConfig::from_file(&cli.config)
        .map(|c| c.logging)
        .unwrap_or_default();
    init_logging(cli.log_level.as_deref(), &logging);

    match cli.command {
        Commands::Start => run_start(cli.config).await,
        Commands::Init { output, node_id, bind } => run_init(output, node_id, bind),
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
    }
}

/// Initialize logging
fn init_logging(level_override: Option<&str>, logging: &LoggingConfig) {
    let level = level_override.unwrap_or(logging.level.as_str());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Start the replica node
async fn run_start(config_path: PathBuf) -> Result<()> {
    tracing::info!("Starting WolfReplica node...");

    let config = match ReplicaConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            tracing::error!("Please check that the config file exists and is valid TOML");
            return Err(e);
        }
    };
    tracing::info!("Loaded configuration for replica {}", config.node.id);

    if let Err(e) = std::fs::create_dir_all(config.storage_dir()) {
        tracing::error!("Failed to create storage directory {:?}: {}", config.storage_dir(), e);
        return Err(e.into());
    }

    let server = Arc::new(ReplicaServer::open(NodeIdentity::from_config(&config)).await?);

    let network = match NetworkServer::bind(&config.node.bind_address, server.clone()).await {
        Ok(n) => Arc::new(n),
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", config.node.bind_address, e);
            return Err(e);
        }
    };

    if let Some(max_idle) = config.idle_timeout() {
        server.spawn_reaper(max_idle, config.reap_interval());
    }

    if config.api.enabled {
        let http = HttpServer::new(config.api.clone(), Arc::clone(&server));
        tokio::spawn(async move {
            if let Err(e) = http.start().await {
                tracing::error!("HTTP API stopped: {}", e);
            }
        });
    }

    let running = Arc::clone(&network);
    let network_task = tokio::spawn(async move { running.run().await });

    tokio::select! {
        result = network_task => {
            match result {
                Ok(inner) => inner?,
                Err(e) => return Err(Error::Network(format!("Network task failed: {}", e))),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
            network.stop();
        }
    }

    tracing::info!("WolfReplica node {} stopped", config.node.id);
    Ok(())
}

/// Write a default configuration file
fn run_init(output: PathBuf, node_id: u32, bind: String) -> Result<()> {
    if output.exists() {
        return Err(Error::Config(format!("{} already exists", output.display())));
    }

    let mut config = ReplicaConfig::default();
    config.node.id = node_id;
    config.node.bind_address = bind;
    config.validate()?;
    config.save(&output)?;

    println!("Wrote configuration for replica {} to {}", node_id, output.display());
    Ok(())
}

/// Validate configuration file
fn run_validate(config_path: PathBuf) -> Result<()> {
    let config = ReplicaConfig::from_file(&config_path)?;
    println!("Configuration OK: replica {} on {}", config.node.id, config.node.bind_address);
    Ok(())
}

/// Show node information
fn run_info(config_path: PathBuf) -> Result<()> {
    let config = ReplicaConfig::from_file(&config_path)?;

    println!();
    println!("WolfReplica Node");
    println!("================");
    println!("Replica ID:     {}", config.node.id);
    println!("Bind address:   {}", config.node.bind_address);
    println!("Advertised as:  {}", config.advertise_address());
    println!("Storage:        {}", config.storage_dir().display());
    match config.network.request_timeout() {
        Some(t) => println!("Request limit:  {:?}", t),
        None => println!("Request limit:  none"),
    }
    match config.idle_timeout() {
        Some(t) => println!("Txn idle limit: {:?}", t),
        None => println!("Txn idle limit: none"),
    }
    if config.api.enabled {
        println!("HTTP API:       {}", config.api.bind_address);
    }
    println!();
    println!("Registry ({} replicas):", config.registry.replicas.len());
    for replica in &config.registry.replicas {
        println!("  {:<10} {}", format!("Replica{}", replica.id), replica.address);
    }
    println!();
    Ok(())
}
