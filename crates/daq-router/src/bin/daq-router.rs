// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Routing coordinator process: ingests tokens, runs the table-building
//! loop, and multicasts routing tables to the configured senders.

use clap::Parser;
use daq_router::{Router, RouterConfig};
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "daq-router")]
#[command(about = "DAQ routing coordinator - token ingestion and table dissemination")]
#[command(version)]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// Multicast group address tables are sent to
    #[arg(long, default_value = "239.255.10.1")]
    multicast_group: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let config = RouterConfig::from_file(&args.config)?;
    tracing::info!(
        receivers = ?config.receivers,
        senders = ?config.senders,
        "loaded router configuration"
    );

    let token_addr: SocketAddr = format!("0.0.0.0:{}", config.effective_port(config.token_port)).parse()?;
    let table_addr: SocketAddr = format!("{}:{}", args.multicast_group, config.effective_port(config.table_port)).parse()?;
    let ack_addr: SocketAddr = format!("0.0.0.0:{}", config.effective_port(config.ack_port)).parse()?;
    let senders = config.senders.clone();
    let max_ack_cycle_count = config.max_ack_cycle_count;

    let router = Arc::new(Router::new(config));
    let stop = Arc::new(AtomicBool::new(false));

    let _token_thread = daq_router::net::spawn_token_listener(router.clone(), token_addr, stop.clone())?;

    let table_socket = daq_router::net::bind_multicast_socket("0.0.0.0:0".parse()?)?;
    let ack_socket = UdpSocket::bind(ack_addr)?;
    ack_socket.set_read_timeout(Some(Duration::from_millis(50)))?;

    ctrlc_shutdown(stop.clone());

    tracing::info!(mode = ?router.mode(), "router running, press Ctrl+C to stop");

    while !stop.load(Ordering::Acquire) {
        let cycle = router.build_cycle();
        if cycle.entries.is_empty() {
            std::thread::sleep(Duration::from_millis(router.config().max_table_update_interval_ms.min(50)));
            continue;
        }

        daq_router::net::send_table(&table_socket, table_addr, &cycle)?;
        tracing::debug!(
            count = cycle.entries.len(),
            first = cycle.first_sequence_id(),
            last = cycle.last_sequence_id(),
            "multicast routing table"
        );

        let mut tracker = daq_router::AckTracker::start(
            &senders,
            cycle.first_sequence_id().unwrap_or_default(),
            cycle.last_sequence_id().unwrap_or_default(),
            max_ack_cycle_count,
        );
        let retry_interval = Duration::from_millis(cycle.interval_ms / max_ack_cycle_count.max(1) as u64);
        while !tracker.is_complete() && !tracker.retries_exhausted() {
            if let Some(ack) = daq_router::net::recv_ack(&ack_socket)? {
                tracker.record(ack);
            }
            if tracker.retransmit_due(retry_interval) {
                daq_router::net::send_table(&table_socket, table_addr, &cycle)?;
                tracker.mark_retransmitted();
            }
        }
        if !tracker.is_complete() {
            tracing::warn!(missing = ?tracker.missing(), "giving up on table acks for this cycle");
        }

        std::thread::sleep(Duration::from_millis(cycle.interval_ms));
    }

    tracing::info!("router shutting down");
    Ok(())
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_signum: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Release);
}

/// Installs a SIGINT handler and spawns a thread that mirrors it into
/// `stop`, so the main loop's own `AtomicBool` stays the single source of
/// truth for shutdown.
fn ctrlc_shutdown(stop: Arc<AtomicBool>) {
    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t);
    }
    std::thread::spawn(move || {
        while !SHUTDOWN_REQUESTED.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(100));
        }
        stop.store(true, Ordering::Release);
    });
}
