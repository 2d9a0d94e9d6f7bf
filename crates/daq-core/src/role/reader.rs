// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The detector front-end role: produces fragments, optionally answers
//! request datagrams, and ships everything out over a [`FragmentSender`].

use crate::config::ReaderConfig;
use crate::error::CoreError;
use daq_proto::{Fragment, FragmentType};
use daq_reqproto::{CommandableFragmentGenerator, GeneratorConfig, RequestReceiver};
use daq_transport::{FragmentSender, RoutingTableCache};
use std::sync::Arc;
use std::time::Duration;

/// A reader process: owns a [`CommandableFragmentGenerator`] fed by
/// whatever hardware interface produces local fragments, a
/// [`RequestReceiver`] for incoming REQ datagrams, and a [`FragmentSender`]
/// that delivers both data and control fragments to their routed builder.
pub struct Reader {
    rank: i32,
    generator: CommandableFragmentGenerator,
    requests: RequestReceiver,
    sender: FragmentSender,
    sent_count: std::sync::atomic::AtomicU64,
}

impl Reader {
    pub fn new(config: &ReaderConfig, routing: Arc<RoutingTableCache>) -> Self {
        let generator_config = GeneratorConfig {
            window_close_timeout: Duration::from_micros(config.window_close_timeout_us),
            missing_request_window_timeout: Duration::from_micros(config.missing_request_window_timeout_us),
            data_buffer_depth_fragments: config.data_buffer_depth_fragments,
            circular_buffer_mode: config.circular_buffer_mode,
        };
        Self {
            rank: config.rank,
            generator: CommandableFragmentGenerator::new(config.request_mode.into(), generator_config),
            requests: RequestReceiver::new(Duration::from_micros(config.missing_request_window_timeout_us)),
            sender: FragmentSender::new(config.rank, routing),
            sent_count: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn rank(&self) -> i32 {
        self.rank
    }

    pub fn sender(&self) -> &FragmentSender {
        &self.sender
    }

    /// Feed a fragment produced locally (by whatever hardware interface
    /// the host process owns) into the buffer the generator answers
    /// requests against, and in `Ignored` mode send it immediately.
    pub fn submit_fragment(&self, fragment: Fragment) -> Result<(), CoreError> {
        self.generator.push_fragment(fragment.clone());
        if matches!(self.generator.mode(), daq_reqproto::WindowMode::Ignored) {
            self.emit(fragment)?;
        }
        Ok(())
    }

    /// Decode a REQ datagram and answer every request it carries that the
    /// generator can resolve right now.
    pub fn handle_request_datagram(&self, buf: &[u8]) -> Result<(), CoreError> {
        self.requests.ingest_datagram(buf)?;
        self.poll_requests()
    }

    /// Re-attempt every outstanding request, emitting a response for each
    /// one the generator is now ready to answer. Call periodically so
    /// `Window` requests that were pending get a chance to resolve.
    pub fn poll_requests(&self) -> Result<(), CoreError> {
        let highest = self.requests.highest_seen_request();
        if let Some(timestamp) = self.requests.timestamp_for(highest) {
            if let Some(fragment) = self.generator.respond(highest, timestamp) {
                self.emit(fragment)?;
            }
        }
        for fragment in self.generator.reap_stale_pending() {
            self.emit(fragment)?;
        }
        Ok(())
    }

    fn emit(&self, fragment: Fragment) -> Result<(), CoreError> {
        if fragment.header.fragment_type.is_system() {
            self.sender.broadcast_fragment(&fragment);
        } else {
            self.sender.send_fragment(&fragment)?;
        }
        self.sent_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    /// Signal end of data to every connected builder, reporting the total
    /// fragment count senders use to detect loss.
    pub fn end_of_data(&self) {
        let total = self.sent_count.load(std::sync::atomic::Ordering::Relaxed);
        self.sender.shutdown(total);
    }

    /// Convenience used by tests and the `Init` control path: push and
    /// immediately broadcast an init fragment rather than routing it.
    pub fn send_init(&self, metadata: Vec<u8>) {
        let fragment = Fragment::new(daq_proto::INVALID_SEQUENCE_ID, daq_proto::INVALID_FRAGMENT_ID, 0, FragmentType::Init, metadata, vec![]);
        self.sender.broadcast_fragment(&fragment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RequestModeConfig;
    use daq_proto::{RoutingMode, RoutingPacketEntry};
    use std::io::Read;
    use std::net::TcpListener;

    fn config() -> ReaderConfig {
        ReaderConfig {
            rank: 1,
            enabled_destinations: vec![2],
            request_mode: RequestModeConfig::Ignored,
            request_delay_ms: 10,
            data_buffer_depth_fragments: 100,
            circular_buffer_mode: true,
            window_close_timeout_us: 500_000,
            missing_request_window_timeout_us: 5_000_000,
        }
    }

    #[test]
    fn ignored_mode_sends_fragments_as_they_arrive() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let routing = Arc::new(RoutingTableCache::new());
        routing.ingest(RoutingMode::RouteBySequenceID, &[RoutingPacketEntry { sequence_id: 1, destination_rank: 2 }]);

        let reader = Reader::new(&config(), routing);
        reader.sender().connect(2, addr).unwrap();
        let (mut server_stream, _) = listener.accept().unwrap();

        reader.submit_fragment(Fragment::new(1, 0, 10, FragmentType::Data, vec![], vec![7])).unwrap();

        let mut header_buf = [0u8; daq_proto::HEADER_BYTES];
        server_stream.read_exact(&mut header_buf).unwrap();
        let header = daq_proto::FragmentHeader::from_bytes(&header_buf).unwrap();
        assert_eq!(header.sequence_id, 1);
    }
}
