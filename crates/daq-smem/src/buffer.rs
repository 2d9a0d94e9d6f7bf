// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A single event buffer and its state machine.

use daq_proto::{EventHeader, Fragment};
use std::collections::BTreeSet;
use std::time::Instant;

/// The four states a buffer can be in. `Overwrite` mode additionally
/// permits `Full -> Writing` and `Reading -> Writing` transitions, which
/// `BufferState` itself does not restrict — that policy decision lives in
/// `SmemEventManager`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Empty,
    Writing,
    Full,
    Reading,
}

/// One SMEM buffer: an event header, its fragments in arrival order, and
/// the bookkeeping needed to decide completeness and staleness.
///
/// Fragment bytes are modeled as owned `Fragment` values appended in
/// order rather than raw bytes copied into a fixed-size memory region.
/// The wire-exact byte layout lives in `daq_proto::FragmentHeader`; the
/// shared-memory segment that would back this buffer across process
/// boundaries is a transport concern, not this type's.
pub struct Buffer {
    pub state: BufferState,
    pub header: EventHeader,
    pub fragments: Vec<Fragment>,
    pub(crate) pending_writes: u32,
    pub(crate) distinct_fragment_ids: BTreeSet<u16>,
    pub(crate) last_touch: Instant,
}

impl Buffer {
    pub fn new() -> Self {
        Self {
            state: BufferState::Empty,
            header: EventHeader::new(0, 0, 0, 0),
            fragments: Vec::new(),
            pending_writes: 0,
            distinct_fragment_ids: BTreeSet::new(),
            last_touch: Instant::now(),
        }
    }

    /// Reclaim this buffer for a new sequence id, discarding any previous
    /// contents. Used both for fresh claims and for overwrite-mode
    /// recycling.
    pub fn reset_for(&mut self, run_id: u32, subrun_id: u32, sequence_id: u64, event_id: u64) {
        self.state = BufferState::Writing;
        self.header = EventHeader::new(run_id, subrun_id, sequence_id, event_id);
        self.fragments.clear();
        self.pending_writes = 0;
        self.distinct_fragment_ids.clear();
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_touch = Instant::now();
    }

    pub fn is_stale(&self, timeout: std::time::Duration) -> bool {
        self.state == BufferState::Writing && self.last_touch.elapsed() >= timeout
    }

    /// An event is complete once it has received one fragment for each
    /// distinct fragment id the run expects; duplicate ids (retransmits)
    /// don't count twice.
    pub fn is_complete(&self, expected_fragments_per_event: usize) -> bool {
        self.distinct_fragment_ids.len() == expected_fragments_per_event
    }

    pub fn push_fragment(&mut self, fragment: Fragment) {
        self.distinct_fragment_ids.insert(fragment.header.fragment_id);
        self.fragments.push(fragment);
        self.touch();
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of one buffer, for diagnostics and inspection tools.
#[derive(Debug, Clone)]
pub struct BufferSnapshot {
    pub index: usize,
    pub state: BufferState,
    pub sequence_id: u64,
    pub fragment_count: usize,
    pub is_complete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_proto::{Fragment, FragmentType};

    #[test]
    fn completeness_counts_distinct_fragment_ids_only() {
        let mut b = Buffer::new();
        b.reset_for(1, 0, 10, 10);
        b.push_fragment(Fragment::new(10, 1, 5, FragmentType::Data, vec![], vec![]));
        b.push_fragment(Fragment::new(10, 1, 5, FragmentType::Data, vec![], vec![])); // duplicate fragment_id
        assert_eq!(b.distinct_fragment_ids.len(), 1);
        assert!(!b.is_complete(2));
        b.push_fragment(Fragment::new(10, 2, 6, FragmentType::Data, vec![], vec![]));
        assert!(b.is_complete(2));
    }

    #[test]
    fn stale_detection_respects_state() {
        let mut b = Buffer::new();
        b.reset_for(1, 0, 1, 1);
        assert!(!b.is_stale(std::time::Duration::from_secs(10)));
        assert!(b.is_stale(std::time::Duration::from_secs(0)));
        b.state = BufferState::Full;
        assert!(!b.is_stale(std::time::Duration::from_secs(0)));
    }
}
