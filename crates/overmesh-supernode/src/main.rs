// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Overmesh Supernode
//!
//! UDP rendezvous and frame relay for overlay virtual Ethernet communities:
//! - keeps the directory of registered edges per community
//! - forwards unicast frames between edges that cannot reach each other
//! - broadcasts to community members
//! - optionally federates with sibling supernodes
//!
//! # Usage
//!
//! ```bash
//! # Start on the default edge port (7654)
//! overmesh-supernode
//!
//! # Custom edge port, federation with two seed siblings
//! overmesh-supernode -l 7654 -s 7655 -i 198.51.100.1:7655 -i 198.51.100.2:7655
//!
//! # Query the management port
//! omeshctl
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::info;

mod config;
mod server;

pub use config::SupernodeConfig;
pub use server::Supernode;

/// Overmesh Supernode - UDP rendezvous for overlay virtual Ethernet networks
#[derive(Parser, Debug)]
#[command(name = "overmesh-supernode")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// UDP port edges register and exchange traffic on
    #[arg(short = 'l', long, default_value_t = overmesh::config::EDGE_PORT_DEFAULT)]
    listen_port: u16,

    /// Run in the foreground (the supernode never daemonizes itself; leave
    /// backgrounding to the service manager)
    #[arg(short = 'f', long)]
    foreground: bool,

    /// Increase trace verbosity (repeatable)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Federation (supernode-to-supernode) listen port; enables federation
    #[arg(short = 's', long)]
    federation_port: Option<u16>,

    /// Seed sibling supernode (repeatable)
    #[arg(short = 'i', long = "supernode", value_name = "IP:PORT")]
    seeds: Vec<SocketAddr>,

    /// Configuration file (JSON format); overrides the other flags
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    // fmt::init also bridges `log` records from the overmesh core.
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .init();

    let config = if let Some(config_path) = args.config {
        info!("Loading config from {:?}", config_path);
        SupernodeConfig::from_file(&config_path)?
    } else {
        SupernodeConfig {
            edge_port: args.listen_port,
            federation_port: args.federation_port,
            seeds: args.seeds,
            ..Default::default()
        }
    };

    if !args.foreground {
        info!("running in the foreground; use the service manager to daemonize");
    }

    info!("+----------------------------------------------------+");
    info!(
        "|       Overmesh Supernode v{}                     |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  Edges:      UDP {:32} |", config.edge_port);
    info!("|  Management: UDP {:32} |", config.mgmt_port);
    info!(
        "|  Federation: {:36} |",
        match config.federation_port {
            Some(port) => format!("UDP {} ({} seeds)", port, config.seeds.len()),
            None => "disabled".to_string(),
        }
    );
    info!("+----------------------------------------------------+");

    let mut supernode = Supernode::new(config)?;

    let running = supernode.running_handle();
    ctrlc::set_handler(move || {
        running.store(false, Ordering::Relaxed);
    })?;

    supernode.run()?;

    info!("supernode stopped");
    Ok(())
}
