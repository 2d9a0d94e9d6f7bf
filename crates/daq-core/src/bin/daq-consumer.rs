// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Consumer process: drains completed events from a builder's
//! shared-memory event manager.
//!
//! This binary runs a builder and consumer in one process, since the
//! fabric's event manager is an in-process collaborator here rather than
//! an actual cross-process shared-memory segment (see DESIGN.md). A
//! deployment that wants a standalone consumer process would instead have
//! the builder expose its `Arc<SmemEventManager>` over an IPC boundary.

use clap::Parser;
use daq_core::{install_sigint_handler, Commander, Consumer, ConsumerConfig};
use daq_smem::{BroadcastConfig, BroadcastRing, SmemConfig, SmemEventManager};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "daq-consumer")]
#[command(about = "DAQ consumer process - sequential event drain")]
#[command(version)]
struct Args {
    #[arg(short, long)]
    config: PathBuf,

    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let config = ConsumerConfig::from_file(&args.config)?;
    let manager = Arc::new(SmemEventManager::new(SmemConfig::default(), BroadcastRing::new(BroadcastConfig::default())));
    let consumer = Consumer::new(&config, manager);
    let commander = Commander::new();
    commander.initialize()?;
    commander.start(0)?;

    tracing::info!(rank = consumer.rank(), "consumer running, press Ctrl+C to stop");
    let stop = install_sigint_handler();

    while !stop.load(Ordering::Acquire) && !consumer.is_drained() {
        match consumer.poll_next() {
            Some(event) => {
                tracing::debug!(sequence_id = event.sequence_id, complete = event.is_complete, "released event");
            }
            None => std::thread::sleep(Duration::from_millis(5)),
        }
    }

    commander.stop()?;
    tracing::info!("consumer shutting down");
    Ok(())
}
