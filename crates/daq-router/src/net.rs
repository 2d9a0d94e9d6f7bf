// SPDX-License-Identifier: Apache-2.0 OR MIT

//! TCP token ingestion, UDP table multicast, and UDP ack collection. The
//! decision logic lives in [`crate::router::Router`]; this module only
//! moves bytes.

use daq_proto::{RoutingAckPacket, RoutingPacketEntry, RoutingPacketHeader, RoutingToken};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::Read;
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::error::RouterError;
use crate::router::{Cycle, Router};

/// Accepts one TCP connection per builder and forwards decoded
/// `RoutingToken` messages into the router's token pool for as long as the
/// connection stays open.
pub fn spawn_token_listener(router: Arc<Router>, addr: SocketAddr, stop: Arc<AtomicBool>) -> std::io::Result<thread::JoinHandle<()>> {
    let listener = TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    Ok(thread::spawn(move || {
        while !stop.load(Ordering::Acquire) {
            match listener.accept() {
                Ok((stream, _)) => {
                    let router = router.clone();
                    let stop = stop.clone();
                    thread::spawn(move || token_connection_loop(router, stream, stop));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(std::time::Duration::from_millis(10));
                }
                Err(_) => break,
            }
        }
    }))
}

fn token_connection_loop(router: Arc<Router>, mut stream: std::net::TcpStream, stop: Arc<AtomicBool>) {
    let mut buf = [0u8; RoutingToken::WIRE_SIZE];
    while !stop.load(Ordering::Acquire) {
        match stream.read_exact(&mut buf) {
            Ok(()) => match RoutingToken::from_bytes(&buf) {
                Ok(token) if token.is_valid() => router.ingest_token(token),
                Ok(_) => tracing::warn!("received token with bad magic, dropping"),
                Err(e) => tracing::warn!("malformed token datagram: {e}"),
            },
            Err(_) => break,
        }
    }
}

/// Opens a UDP socket bound for multicast table dissemination.
pub fn bind_multicast_socket(addr: SocketAddr) -> Result<UdpSocket, RouterError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// Multicasts one table as a header datagram followed by an entries
/// datagram, matching the two-`sendto` wire convention.
pub fn send_table(socket: &UdpSocket, destination: SocketAddr, cycle: &Cycle) -> std::io::Result<()> {
    let header = RoutingPacketHeader::new(cycle.mode, cycle.entries.len());
    socket.send_to(&header.to_bytes(), destination)?;
    let mut entries_buf = Vec::with_capacity(cycle.entries.len() * RoutingPacketEntry::WIRE_SIZE);
    for &(sequence_id, destination_rank) in &cycle.entries {
        entries_buf.extend_from_slice(&RoutingPacketEntry { sequence_id, destination_rank }.to_bytes());
    }
    socket.send_to(&entries_buf, destination)?;
    Ok(())
}

/// Receives one `RoutingAckPacket` with a bounded wait, or `None` on
/// timeout.
pub fn recv_ack(socket: &UdpSocket) -> std::io::Result<Option<RoutingAckPacket>> {
    let mut buf = [0u8; RoutingAckPacket::WIRE_SIZE];
    match socket.recv_from(&mut buf) {
        Ok((n, _)) if n >= RoutingAckPacket::WIRE_SIZE => Ok(RoutingAckPacket::from_bytes(&buf).ok()),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
        Err(e) => Err(e),
    }
}
