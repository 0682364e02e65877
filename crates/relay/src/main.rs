// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! pnr-relay: development WebSocket relay for the PNR live protocol.
//!
//! Tracks room membership, answers mutations with `update_confirmation`
//! and fans status changes out to the rooms that asked for them.

mod server;
mod state;

use clap::Parser;
use std::net::SocketAddr;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use state::{RelayState, ReplyMode};

/// pnr-relay: PNR live update relay server
#[derive(Parser, Debug)]
#[command(name = "pnr-relay")]
#[command(about = "WebSocket relay server for PNR live updates")]
struct Args {
    /// Address to bind the server to
    #[arg(short, long, default_value = "0.0.0.0:3001")]
    bind: SocketAddr,

    /// How to answer mutations
    #[arg(short, long, value_enum, default_value_t = ReplyMode::Confirm)]
    mode: ReplyMode,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting pnr-relay server");
    info!("  Bind address: {}", args.bind);
    info!("  Reply mode: {:?}", args.mode);

    let state = RelayState::new(args.mode);
    server::run(args.bind, state).await?;

    Ok(())
}
