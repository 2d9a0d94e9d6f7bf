// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Reader process: produces fragments, answers REQ datagrams, and ships
//! everything to the builder selected by the routing table.

use clap::Parser;
use daq_core::{install_sigint_handler, Commander, Reader, ReaderConfig};
use daq_transport::{RoutingListener, RoutingTableCache};
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "daq-reader")]
#[command(about = "DAQ reader process - fragment production and REQ handling")]
#[command(version)]
struct Args {
    #[arg(short, long)]
    config: PathBuf,

    /// Multicast address the router's routing tables arrive on
    #[arg(long, default_value = "239.255.10.1:35556")]
    table_addr: SocketAddr,

    /// Multicast address request datagrams arrive on
    #[arg(long, default_value = "239.255.11.1:3001")]
    request_addr: SocketAddr,

    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let config = ReaderConfig::from_file(&args.config)?;
    let routing = Arc::new(RoutingTableCache::new());
    let reader = Arc::new(Reader::new(&config, routing.clone()));
    let commander = Commander::new();
    commander.initialize()?;

    for &destination in &config.enabled_destinations {
        tracing::info!(destination, "awaiting connection to builder");
    }

    let table_socket = UdpSocket::bind(args.table_addr)?;
    table_socket.set_read_timeout(Some(Duration::from_millis(100)))?;
    let listener = RoutingListener::new();

    let request_socket = UdpSocket::bind(args.request_addr)?;
    request_socket.set_read_timeout(Some(Duration::from_millis(50)))?;

    commander.start(0)?;
    tracing::info!(rank = reader.rank(), "reader running, press Ctrl+C to stop");
    let stop = install_sigint_handler();

    let mut table_buf = [0u8; 65536];
    let mut request_buf = [0u8; 65536];
    while !stop.load(Ordering::Acquire) {
        if let Ok((n, _)) = table_socket.recv_from(&mut table_buf) {
            if let Err(err) = listener.on_datagram(&routing, &table_buf[..n]) {
                tracing::warn!(%err, "failed to decode routing datagram");
            }
        }
        if let Ok((n, _)) = request_socket.recv_from(&mut request_buf) {
            if let Err(err) = reader.handle_request_datagram(&request_buf[..n]) {
                tracing::warn!(%err, "failed to handle request datagram");
            }
        } else {
            reader.poll_requests().ok();
        }
    }

    reader.end_of_data();
    commander.stop()?;
    tracing::info!("reader shutting down");
    Ok(())
}
