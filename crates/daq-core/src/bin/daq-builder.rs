// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Builder process: hosts the shared-memory event manager, assembles
//! fragments from its enabled sources, and reports routing credit to the
//! router.

use clap::Parser;
use daq_core::{install_sigint_handler, Builder, BuilderConfig, Commander, NoRestartSupervisor};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "daq-builder")]
#[command(about = "DAQ builder process - fragment assembly and event release")]
#[command(version)]
struct Args {
    #[arg(short, long)]
    config: PathBuf,

    /// Address this builder's DRM listens on for incoming fragments
    #[arg(long, default_value = "0.0.0.0:0")]
    bind_addr: SocketAddr,

    /// Router's token TCP address
    #[arg(long)]
    router_addr: Option<SocketAddr>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let config = BuilderConfig::from_file(&args.config)?;
    let builder = Arc::new(Builder::new(&config, args.bind_addr, Arc::new(NoRestartSupervisor))?);
    let commander = Commander::new();
    commander.initialize()?;

    if let Some(router_addr) = args.router_addr {
        builder.connect_to_router(router_addr)?;
        builder.report_token(config.buffer_count as u32)?;
    }

    commander.start(0)?;
    tracing::info!(rank = config.rank, addr = %builder.local_addr(), "builder running, press Ctrl+C to stop");
    let stop = install_sigint_handler();

    while !stop.load(Ordering::Acquire) {
        if builder.ingest_one(Duration::from_millis(100))?.is_some() {
            builder.check_pending();
        }
        if builder.all_sources_done() {
            tracing::info!("all enabled sources reported EndOfData");
            break;
        }
    }

    builder.end_of_data();
    commander.stop()?;
    tracing::info!("builder shutting down");
    Ok(())
}
