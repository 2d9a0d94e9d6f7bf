// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Data Sender Manager: delivers fragments produced by a reader to the
//! builder rank selected by the routing table.

use crate::error::TransportError;
use crate::routing_cache::RoutingTableCache;
use daq_proto::{Fragment, FragmentType};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

/// Sends fragments over one TCP connection per destination builder rank,
/// selecting the destination from a shared [`RoutingTableCache`].
pub struct FragmentSender {
    rank: i32,
    routing: Arc<RoutingTableCache>,
    connections: Mutex<HashMap<i32, TcpStream>>,
}

impl FragmentSender {
    pub fn new(rank: i32, routing: Arc<RoutingTableCache>) -> Self {
        Self {
            rank,
            routing,
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub fn rank(&self) -> i32 {
        self.rank
    }

    pub fn connect(&self, destination_rank: i32, addr: SocketAddr) -> Result<(), TransportError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        log::info!("DSM connected to rank {destination_rank} at {addr}");
        self.connections.lock().insert(destination_rank, stream);
        Ok(())
    }

    pub fn is_connected(&self, destination_rank: i32) -> bool {
        self.connections.lock().contains_key(&destination_rank)
    }

    pub fn connected_ranks(&self) -> Vec<i32> {
        self.connections.lock().keys().copied().collect()
    }

    /// Route and send a data fragment. Requires a routing table entry for
    /// the fragment's sequence id.
    pub fn send_fragment(&self, fragment: &Fragment) -> Result<(), TransportError> {
        let destination = self
            .routing
            .destination_for(fragment.header.sequence_id)
            .ok_or(TransportError::NoRoute(fragment.header.sequence_id))?;
        self.send_to_rank(destination, fragment)
    }

    /// Send a control fragment (Init, EndOfRun, EndOfSubrun, EndOfData,
    /// Shutdown) to every currently connected destination, ignoring
    /// individual connection failures beyond logging them.
    pub fn broadcast_fragment(&self, fragment: &Fragment) {
        debug_assert!(fragment.header.fragment_type.is_system());
        let ranks = self.connected_ranks();
        for rank in ranks {
            if let Err(err) = self.send_to_rank(rank, fragment) {
                log::warn!("failed to broadcast {:?} to rank {rank}: {err}", fragment.header.fragment_type);
            }
        }
    }

    fn send_to_rank(&self, destination_rank: i32, fragment: &Fragment) -> Result<(), TransportError> {
        let mut connections = self.connections.lock();
        let stream = connections
            .get_mut(&destination_rank)
            .ok_or(TransportError::NotConnected(destination_rank))?;
        write_fragment(stream, fragment)
    }

    /// Tell every connected destination this sender is done, then drop the
    /// connections. Per the wire protocol, senders report how many total
    /// fragments they emitted so receivers can detect loss.
    pub fn shutdown(&self, total_sent: u64) {
        let end = Fragment::end_of_data(self.rank, daq_proto::INVALID_FRAGMENT_ID, total_sent);
        self.broadcast_fragment(&end);
        self.connections.lock().clear();
    }
}

fn write_fragment(stream: &mut TcpStream, fragment: &Fragment) -> Result<(), TransportError> {
    stream.write_all(&fragment.header.to_bytes())?;
    stream.write_all(&fragment.metadata)?;
    stream.write_all(&fragment.payload)?;
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_proto::RoutingMode;
    use std::io::Read;
    use std::net::TcpListener;

    #[test]
    fn send_without_route_fails() {
        let routing = Arc::new(RoutingTableCache::new());
        let sender = FragmentSender::new(1, routing);
        let fragment = Fragment::new(1, 0, 0, FragmentType::Data, vec![], vec![]);
        assert!(matches!(sender.send_fragment(&fragment), Err(TransportError::NoRoute(1))));
    }

    #[test]
    fn routed_fragment_is_written_to_the_right_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let routing = Arc::new(RoutingTableCache::new());
        routing.ingest(RoutingMode::RouteBySequenceID, &[daq_proto::RoutingPacketEntry { sequence_id: 7, destination_rank: 2 }]);
        let sender = FragmentSender::new(1, routing);
        sender.connect(2, addr).unwrap();
        let (mut server_stream, _) = listener.accept().unwrap();

        let fragment = Fragment::new(7, 3, 10, FragmentType::Data, vec![], vec![9, 9]);
        sender.send_fragment(&fragment).unwrap();

        let mut header_buf = [0u8; daq_proto::HEADER_BYTES];
        server_stream.read_exact(&mut header_buf).unwrap();
        let header = daq_proto::FragmentHeader::from_bytes(&header_buf).unwrap();
        assert_eq!(header.sequence_id, 7);
        let mut payload = vec![0u8; header.payload_words() as usize * 8];
        server_stream.read_exact(&mut payload).unwrap();
        assert_eq!(&payload[0..2], &[9, 9]);
    }
}
