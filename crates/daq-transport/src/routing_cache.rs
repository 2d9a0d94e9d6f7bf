// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Receiver-side cache of the router's `(sequence_id -> destination_rank)`
//! table, fed by [`RoutingListener`] as routing packets arrive.

use crate::error::TransportError;
use daq_proto::{RoutingMode, RoutingPacketEntry, RoutingPacketHeader};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};

struct Inner {
    table: BTreeMap<u64, i32>,
    mode: RoutingMode,
}

/// Thread-safe lookup table mapping sequence ids to the rank that should
/// receive them, built incrementally from routing packets broadcast by a
/// router.
pub struct RoutingTableCache {
    inner: Mutex<Inner>,
}

impl RoutingTableCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                table: BTreeMap::new(),
                mode: RoutingMode::default(),
            }),
        }
    }

    pub fn ingest(&self, mode: RoutingMode, entries: &[RoutingPacketEntry]) {
        let mut inner = self.inner.lock();
        inner.mode = mode;
        for entry in entries {
            inner.table.insert(entry.sequence_id, entry.destination_rank);
        }
    }

    pub fn destination_for(&self, sequence_id: u64) -> Option<i32> {
        self.inner.lock().table.get(&sequence_id).copied()
    }

    pub fn mode(&self) -> RoutingMode {
        self.inner.lock().mode
    }

    pub fn highest_routed(&self) -> Option<u64> {
        self.inner.lock().table.keys().next_back().copied()
    }

    /// Drop entries below `sequence_id`, bounding memory once a run of
    /// sequence ids is known to have been fully delivered.
    pub fn forget_before(&self, sequence_id: u64) {
        self.inner.lock().table.retain(|&sid, _| sid >= sequence_id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RoutingTableCache {
    fn default() -> Self {
        Self::new()
    }
}

/// A router sends a `RoutingPacketHeader` and the matching
/// `RoutingPacketEntry` array as two successive datagrams; receivers are
/// expected to tolerate either arrival order. `RoutingListener` buffers
/// whichever half arrives first and pairs it with its match once the
/// other half shows up.
pub struct RoutingListener {
    state: Mutex<ListenerState>,
}

#[derive(Default)]
struct ListenerState {
    pending_header: Option<RoutingPacketHeader>,
    pending_entries: VecDeque<Vec<u8>>,
}

const MAX_PENDING_ENTRY_BUFS: usize = 8;

impl RoutingListener {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ListenerState::default()),
        }
    }

    /// Feed one received UDP datagram. Tries to decode it as a header
    /// first; if that fails, treats it as a raw entries buffer.
    pub fn on_datagram(&self, cache: &RoutingTableCache, buf: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if let Ok(header) = RoutingPacketHeader::from_bytes(buf) {
            let expected_len = header.n_entries as usize * RoutingPacketEntry::WIRE_SIZE;
            if let Some(pos) = state.pending_entries.iter().position(|e| e.len() == expected_len) {
                let entries_buf = state.pending_entries.remove(pos).unwrap();
                apply(cache, &header, &entries_buf)?;
            } else {
                state.pending_header = Some(header);
            }
            return Ok(());
        }
        if let Some(header) = state.pending_header.take() {
            apply(cache, &header, buf)?;
        } else {
            state.pending_entries.push_back(buf.to_vec());
            if state.pending_entries.len() > MAX_PENDING_ENTRY_BUFS {
                state.pending_entries.pop_front();
            }
        }
        Ok(())
    }
}

impl Default for RoutingListener {
    fn default() -> Self {
        Self::new()
    }
}

fn apply(cache: &RoutingTableCache, header: &RoutingPacketHeader, entries_buf: &[u8]) -> Result<(), TransportError> {
    let mut entries = Vec::with_capacity(header.n_entries as usize);
    let mut offset = 0;
    for _ in 0..header.n_entries {
        let entry = RoutingPacketEntry::from_bytes(&entries_buf[offset..])?;
        entries.push(entry);
        offset += RoutingPacketEntry::WIRE_SIZE;
    }
    cache.ingest(header.mode, &entries);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries_bytes(entries: &[RoutingPacketEntry]) -> Vec<u8> {
        entries.iter().flat_map(|e| e.to_bytes()).collect()
    }

    #[test]
    fn header_then_entries_resolves_immediately() {
        let cache = RoutingTableCache::new();
        let listener = RoutingListener::new();
        let entries = vec![
            RoutingPacketEntry { sequence_id: 1, destination_rank: 2 },
            RoutingPacketEntry { sequence_id: 2, destination_rank: 3 },
        ];
        let header = RoutingPacketHeader::new(RoutingMode::RouteBySequenceID, entries.len());
        listener.on_datagram(&cache, &header.to_bytes()).unwrap();
        listener.on_datagram(&cache, &entries_bytes(&entries)).unwrap();
        assert_eq!(cache.destination_for(1), Some(2));
        assert_eq!(cache.destination_for(2), Some(3));
    }

    #[test]
    fn entries_then_header_resolves_out_of_order() {
        let cache = RoutingTableCache::new();
        let listener = RoutingListener::new();
        let entries = vec![RoutingPacketEntry { sequence_id: 9, destination_rank: 1 }];
        let header = RoutingPacketHeader::new(RoutingMode::RouteBySendCount, entries.len());
        listener.on_datagram(&cache, &entries_bytes(&entries)).unwrap();
        assert!(cache.destination_for(9).is_none());
        listener.on_datagram(&cache, &header.to_bytes()).unwrap();
        assert_eq!(cache.destination_for(9), Some(1));
        assert_eq!(cache.mode(), RoutingMode::RouteBySendCount);
    }

    #[test]
    fn forget_before_prunes_old_entries() {
        let cache = RoutingTableCache::new();
        cache.ingest(
            RoutingMode::RouteBySequenceID,
            &[
                RoutingPacketEntry { sequence_id: 1, destination_rank: 0 },
                RoutingPacketEntry { sequence_id: 5, destination_rank: 1 },
            ],
        );
        cache.forget_before(5);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.destination_for(5), Some(1));
    }
}
