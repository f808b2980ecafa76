// ============================================
// File: crates/nextun-server/src/main.rs
// ============================================
//! # nextun Server Entry Point
//!
//! ## Creation Reason
//! Main entry point for the nextun tunnel server binary.
//! Handles CLI parsing, logging setup, and server initialization.
//!
//! ## Main Functionality
//! - CLI argument parsing with clap
//! - Logging initialization with tracing
//! - Configuration loading and validation
//! - Server execution
//!
//! ## Usage
//! ```bash
//! nextun-server start                         # default config path
//! nextun-server start --config ./server.toml
//! nextun-server validate --config ./server.toml
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The binary runs on the in-memory interface; packets written to it
//!   are drained and discarded
//! - `RUST_LOG` overrides `[logging] level`
//!
//! ## Last Modified
//! v0.1.0 - Initial CLI implementation

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, trace};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nextun_server::{Server, ServerConfig};
use nextun_transport::tun::QueueTun;

// ============================================
// CLI Definition
// ============================================

/// nextun tunnel server
#[derive(Parser, Debug)]
#[command(name = "nextun-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the server
    Start {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/nextun/server.toml")]
        config: PathBuf,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/nextun/server.toml")]
        config: PathBuf,
    },
}

// ============================================
// Main
// ============================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Start { config } => cmd_start(&config).await,
        Commands::Validate { config } => cmd_validate(&config).await,
    };

    if let Err(e) = result {
        init_logging("info");
        error!("{:#}", e);
        std::process::exit(1);
    }
}

// ============================================
// Commands
// ============================================

/// Starts the server.
async fn cmd_start(config_path: &Path) -> anyhow::Result<()> {
    let found = config_path.exists();
    let config = if found {
        ServerConfig::load(config_path).await?
    } else {
        ServerConfig::default()
    };
    init_logging(&config.logging.level);

    if found {
        info!(config = %config_path.display(), "Starting nextun server...");
    } else {
        info!(config = %config_path.display(), "Config file not found, using defaults");
    }

    let tun = Arc::new(QueueTun::new(Server::device_config(&config)));
    let server = Server::new(config, tun.clone()).context("failed to build server")?;

    let sink = tokio::spawn(async move {
        loop {
            let packet = tun.next_written().await;
            trace!(len = packet.len(), "Discarded outbound packet");
        }
    });

    let result = server.run().await;
    sink.abort();
    result?;

    Ok(())
}

/// Validates configuration file.
async fn cmd_validate(config_path: &Path) -> anyhow::Result<()> {
    if !config_path.exists() {
        println!("⚠️  Config file not found: {}", config_path.display());
        println!("   Server will use default values.");
        return Ok(());
    }

    let config = ServerConfig::load(config_path).await?;

    println!("✅ Configuration is valid");
    println!();
    println!("Network:");
    println!("   Bind:       {}", config.network.bind_addr);
    println!();
    println!("Data Channels:");
    println!("   Count:      {}", config.channels.count);
    println!("   Retry:      {}ms", config.channels.retry_delay_ms);
    println!();
    println!("VPN:");
    println!("   Network:    {}", config.vpn.net);
    println!("   Gateway:    {}", config.vpn.gateway());
    println!();
    println!("TUN:");
    println!("   Device:     {}", config.tun.device_name);
    println!("   MTU:        {}", config.tun.mtu);
    println!();
    println!("Limits:");
    println!("   Max Users:    {}", config.limits.max_users);
    println!("   Queue Depth:  {}", config.limits.queue_depth);
    println!();

    Ok(())
}

// ============================================
// Helper Functions
// ============================================

/// Initializes the tracing subscriber.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .ok();
}
