// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The event-building role: hosts an [`SmemEventManager`] and a
//! [`FragmentReceiver`], assembling incoming fragments into events and
//! reporting credit back to the router as token TCP datagrams.

use crate::config::BuilderConfig;
use crate::error::CoreError;
use crate::supervisor::ConsumerSupervisor;
use daq_proto::{Fragment, FragmentType, RoutingToken};
use daq_smem::{BroadcastRing, ReleasedEvent, SmemEventManager, WriteOutcome};
use daq_transport::FragmentReceiver;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

/// A builder process: assembles fragments from its enabled sources into
/// events and publishes them to consumers, reporting routing credit back
/// upstream.
pub struct Builder {
    rank: i32,
    enabled_sources: Vec<i32>,
    manager: Arc<SmemEventManager>,
    receiver: FragmentReceiver,
    ended_sources: Mutex<BTreeSet<i32>>,
    token_stream: Mutex<Option<TcpStream>>,
    supervisor: Arc<dyn ConsumerSupervisor>,
}

impl Builder {
    pub fn new(config: &BuilderConfig, bind_addr: SocketAddr, supervisor: Arc<dyn ConsumerSupervisor>) -> Result<Self, CoreError> {
        let broadcast = BroadcastRing::new(config.broadcast_config());
        let manager = Arc::new(SmemEventManager::new(config.smem_config(), broadcast));
        let receiver = FragmentReceiver::bind(bind_addr)?;
        Ok(Self {
            rank: config.rank,
            enabled_sources: config.enabled_sources.clone(),
            manager,
            receiver,
            ended_sources: Mutex::new(BTreeSet::new()),
            token_stream: Mutex::new(None),
            supervisor,
        })
    }

    pub fn manager(&self) -> &Arc<SmemEventManager> {
        &self.manager
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.receiver.local_addr()
    }

    pub fn connect_to_router(&self, router_token_addr: SocketAddr) -> Result<(), CoreError> {
        let stream = TcpStream::connect(router_token_addr)?;
        stream.set_nodelay(true)?;
        *self.token_stream.lock() = Some(stream);
        Ok(())
    }

    /// Report `new_slots_free` buffers as available for more work.
    pub fn report_token(&self, new_slots_free: u32) -> Result<(), CoreError> {
        let mut guard = self.token_stream.lock();
        let stream = guard.as_mut().ok_or_else(|| CoreError::Config("not connected to router".into()))?;
        let token = RoutingToken::new(self.rank, new_slots_free);
        stream.write_all(&token.to_bytes())?;
        stream.flush()?;
        Ok(())
    }

    /// Pull the next fragment off the DRM channel and dispatch it, if one
    /// arrives within `timeout`. Returns `Ok(None)` on a plain timeout so
    /// callers can loop without treating it as an error.
    pub fn ingest_one(&self, timeout: Duration) -> Result<Option<()>, CoreError> {
        let fragment = match self.receiver.recv_fragment(timeout) {
            Ok(fragment) => fragment,
            Err(daq_transport::TransportError::Timeout(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        self.dispatch(fragment)?;
        Ok(Some(()))
    }

    fn dispatch(&self, fragment: Fragment) -> Result<(), CoreError> {
        match fragment.header.fragment_type {
            FragmentType::Data => self.write_data_fragment(fragment),
            FragmentType::EndOfData => {
                if let Some(sender_rank) = fragment.sender_rank() {
                    self.ended_sources.lock().insert(sender_rank);
                }
                Ok(())
            }
            FragmentType::Init => {
                self.manager.set_init_fragment(fragment);
                Ok(())
            }
            FragmentType::EndOfSubrun => {
                self.manager.rollover_subrun(fragment.header.sequence_id);
                Ok(())
            }
            FragmentType::EndOfRun => Ok(()),
            _ => Ok(()),
        }
    }

    fn write_data_fragment(&self, fragment: Fragment) -> Result<(), CoreError> {
        let header = fragment.header;
        match self.manager.write_fragment_header(header, false) {
            WriteOutcome::Cursor(cursor) => {
                self.manager.write_fragment_body(&cursor, fragment)?;
                self.manager.done_writing_fragment(&cursor);
                Ok(())
            }
            WriteOutcome::Busy => Err(CoreError::Smem(daq_smem::SmemError::Busy)),
            WriteOutcome::Dropped => Ok(()),
        }
    }

    /// Reap stale buffers into released events. Call periodically from
    /// the builder's main loop.
    pub fn check_pending(&self) {
        self.manager.check_pending_buffers();
    }

    pub fn read_next(&self, expected_sequence_id: u64) -> Option<ReleasedEvent> {
        self.manager.read_next(expected_sequence_id)
    }

    /// True once every enabled source has reported `EndOfData`.
    pub fn all_sources_done(&self) -> bool {
        let ended = self.ended_sources.lock();
        self.enabled_sources.iter().all(|rank| ended.contains(rank))
    }

    pub fn end_of_data(&self) {
        self.manager.end_of_data(self.rank);
    }

    /// Notify the configured supervisor that a consumer at `rank` dropped
    /// off; returns whether it should be considered replaced.
    pub fn on_consumer_disconnected(&self, rank: i32) -> bool {
        self.supervisor.on_consumer_disconnected(rank)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::NoRestartSupervisor;
    use daq_proto::FragmentType;

    fn config() -> BuilderConfig {
        BuilderConfig {
            rank: 1,
            enabled_sources: vec![2, 3],
            buffer_count: 4,
            max_fragment_size_bytes: 1 << 16,
            expected_fragments_per_event: 1,
            overwrite_mode: false,
            broadcast_mode: false,
            stale_buffer_timeout_ms: 5_000,
            maximum_oversize_fragment_count: 1,
            expected_art_event_processing_time_us: 100_000,
            use_sequence_id_for_event_number: true,
            broadcast_buffer_count: 4,
            broadcast_timeout_ms: 3_000,
        }
    }

    #[test]
    fn all_sources_done_requires_every_enabled_source() {
        let builder = Builder::new(&config(), "127.0.0.1:0".parse().unwrap(), Arc::new(NoRestartSupervisor)).unwrap();
        assert!(!builder.all_sources_done());
        builder.dispatch(Fragment::end_of_data(2, 2, 10)).unwrap();
        assert!(!builder.all_sources_done());
        builder.dispatch(Fragment::end_of_data(3, 3, 5)).unwrap();
        assert!(builder.all_sources_done());
    }

    #[test]
    fn data_fragment_completes_and_releases_an_event() {
        let builder = Builder::new(&config(), "127.0.0.1:0".parse().unwrap(), Arc::new(NoRestartSupervisor)).unwrap();
        let fragment = Fragment::new(1, 0, 5, FragmentType::Data, vec![], vec![1, 2, 3]);
        builder.dispatch(fragment).unwrap();
        builder.check_pending();
        let event = builder.read_next(1).expect("event should release");
        assert_eq!(event.sequence_id, 1);
        assert!(event.is_complete);
    }
}
