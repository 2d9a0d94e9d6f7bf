// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The shared-memory event manager: the builder-side ring that turns a
//! stream of incoming fragments, keyed by sequence id, into complete
//! events ready for a consumer to read.

use crate::buffer::{Buffer, BufferSnapshot, BufferState};
use crate::config::SmemConfig;
use crate::error::SmemError;
use crate::broadcast::BroadcastRing;
use daq_proto::{Fragment, FragmentHeader, FragmentType, INVALID_FRAGMENT_ID, INVALID_SEQUENCE_ID};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Where a claimed write should land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteCursor {
    pub buffer_index: usize,
    pub sequence_id: u64,
}

/// Result of attempting to claim a buffer for a fragment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Cursor(WriteCursor),
    /// No buffer was available and the caller asked to wait instead of
    /// dropping.
    Busy,
    /// The fragment was discarded outright (non-blocking caller, or a
    /// late arrival for an already-released sequence id).
    Dropped,
}

/// A released event as handed to a consumer.
#[derive(Debug, Clone)]
pub struct ReleasedEvent {
    pub run_id: u32,
    pub subrun_id: u32,
    pub sequence_id: u64,
    pub event_id: u64,
    pub is_complete: bool,
    pub fragments: Vec<Fragment>,
}

struct SeqState {
    /// Sequence ids currently claiming a buffer, whether still being
    /// written or already complete and waiting for in-order release.
    active: HashMap<u64, usize>,
    /// Completed sequence ids waiting to be released to `Full` in order.
    pending_release: BTreeSet<u64>,
    /// Buffers with no claim at all.
    free: VecDeque<usize>,
    /// Sequence ids already released at least once. Any further fragment
    /// for one of these arrived late and is diverted rather than reopening
    /// a buffer that's already gone out.
    released: BTreeSet<u64>,
}

impl SeqState {
    fn new(buffer_count: usize) -> Self {
        Self {
            active: HashMap::new(),
            pending_release: BTreeSet::new(),
            free: (0..buffer_count).collect(),
            released: BTreeSet::new(),
        }
    }
}

/// The fragment-to-event assembly ring described by this crate. One
/// instance is owned by a builder process; readers drain completed events
/// through [`SmemEventManager::read_next`].
pub struct SmemEventManager {
    config: SmemConfig,
    buffers: Vec<Mutex<Buffer>>,
    seq: Mutex<SeqState>,
    subrun_boundary: Mutex<Option<u64>>,
    run_id: AtomicU32,
    subrun_id: AtomicU32,
    oversize_count: AtomicU64,
    incomplete_count: AtomicU64,
    init_fragment: Mutex<Option<Fragment>>,
    missing_fragment_counts: Mutex<HashMap<u64, usize>>,
    broadcast: BroadcastRing,
    stopped: AtomicBool,
}

impl SmemEventManager {
    pub fn new(config: SmemConfig, broadcast: BroadcastRing) -> Self {
        let buffer_count = config.buffer_count;
        Self {
            buffers: (0..buffer_count).map(|_| Mutex::new(Buffer::new())).collect(),
            seq: Mutex::new(SeqState::new(buffer_count)),
            subrun_boundary: Mutex::new(None),
            run_id: AtomicU32::new(0),
            subrun_id: AtomicU32::new(0),
            oversize_count: AtomicU64::new(0),
            incomplete_count: AtomicU64::new(0),
            init_fragment: Mutex::new(None),
            missing_fragment_counts: Mutex::new(HashMap::new()),
            broadcast,
            stopped: AtomicBool::new(false),
            config,
        }
    }

    pub fn config(&self) -> &SmemConfig {
        &self.config
    }

    pub fn oversize_count(&self) -> u64 {
        self.oversize_count.load(Ordering::Relaxed)
    }

    pub fn incomplete_count(&self) -> u64 {
        self.incomplete_count.load(Ordering::Relaxed)
    }

    fn event_id_for(&self, header: &FragmentHeader) -> u64 {
        if self.config.use_sequence_id_for_event_number {
            header.sequence_id
        } else {
            header.timestamp
        }
    }

    /// Find the lowest-sequence-id buffer that is `Full` or `Reading` and
    /// not on the `pending_release` list, evict it, and return its index.
    /// Used only in `overwrite_mode` once the free list is exhausted.
    fn reclaim_locked(&self, seq: &mut SeqState) -> Option<usize> {
        let mut candidate: Option<(u64, usize)> = None;
        for (&sid, &idx) in seq.active.iter() {
            if seq.pending_release.contains(&sid) {
                continue;
            }
            let state = self.buffers[idx].lock().state;
            if matches!(state, BufferState::Full | BufferState::Reading) {
                if candidate.map(|(best, _)| sid < best).unwrap_or(true) {
                    candidate = Some((sid, idx));
                }
            }
        }
        if let Some((sid, idx)) = candidate {
            seq.active.remove(&sid);
            idx.into()
        } else {
            None
        }
    }

    fn claim_buffer(&self, seq: &mut SeqState, idx: usize, header: &FragmentHeader) {
        let mut boundary = self.subrun_boundary.lock();
        if let Some(b) = *boundary {
            if header.sequence_id >= b {
                self.subrun_id.fetch_add(1, Ordering::AcqRel);
                *boundary = None;
            }
        }
        drop(boundary);
        let event_id = self.event_id_for(header);
        let run_id = self.run_id.load(Ordering::Acquire);
        let subrun_id = self.subrun_id.load(Ordering::Acquire);
        self.buffers[idx]
            .lock()
            .reset_for(run_id, subrun_id, header.sequence_id, event_id);
        seq.active.insert(header.sequence_id, idx);
    }

    /// Claim a buffer for `header`, allocating a fresh one, reusing an
    /// already-claimed one, or reclaiming a stale one under overwrite mode.
    pub fn write_fragment_header(&self, header: FragmentHeader, drop_if_full: bool) -> WriteOutcome {
        let mut seq = self.seq.lock();
        if seq.released.contains(&header.sequence_id) {
            log::debug!(
                "dropping late fragment for already-released sequence {}",
                header.sequence_id
            );
            return WriteOutcome::Dropped;
        }
        let idx = if let Some(&idx) = seq.active.get(&header.sequence_id) {
            idx
        } else if let Some(idx) = seq.free.pop_front() {
            self.claim_buffer(&mut seq, idx, &header);
            idx
        } else if self.config.overwrite_mode {
            match self.reclaim_locked(&mut seq) {
                Some(idx) => {
                    self.claim_buffer(&mut seq, idx, &header);
                    idx
                }
                None => {
                    return if drop_if_full {
                        WriteOutcome::Dropped
                    } else {
                        WriteOutcome::Busy
                    }
                }
            }
        } else {
            return if drop_if_full {
                WriteOutcome::Dropped
            } else {
                WriteOutcome::Busy
            };
        };
        self.buffers[idx].lock().pending_writes += 1;
        WriteOutcome::Cursor(WriteCursor {
            buffer_index: idx,
            sequence_id: header.sequence_id,
        })
    }

    /// Append `fragment`'s payload to the buffer identified by `cursor`.
    /// Oversize fragments are dropped whole and counted rather than stored.
    pub fn write_fragment_body(&self, cursor: &WriteCursor, fragment: Fragment) -> Result<(), SmemError> {
        let size = fragment.header.word_count as usize * 8;
        if size > self.config.max_fragment_size_bytes {
            let count = self.oversize_count.fetch_add(1, Ordering::Relaxed) + 1;
            if self.config.maximum_oversize_fragment_count != 0
                && count > self.config.maximum_oversize_fragment_count
            {
                return Err(SmemError::TooManyOversizeFragments { count });
            }
            return Err(SmemError::Oversize {
                size,
                max: self.config.max_fragment_size_bytes,
            });
        }
        self.buffers[cursor.buffer_index].lock().push_fragment(fragment);
        Ok(())
    }

    /// Mark a write against `cursor` as finished. Once every pending write
    /// for a buffer has completed and the buffer holds one fragment per
    /// expected fragment id, the sequence id is queued for in-order release.
    pub fn done_writing_fragment(&self, cursor: &WriteCursor) {
        let mut completed = false;
        {
            let mut buf = self.buffers[cursor.buffer_index].lock();
            buf.pending_writes = buf.pending_writes.saturating_sub(1);
            if buf.pending_writes == 0 && buf.is_complete(self.config.expected_fragments_per_event) {
                buf.header.is_complete = true;
                completed = true;
            }
        }
        if completed {
            self.seq.lock().pending_release.insert(cursor.sequence_id);
        }
    }

    /// Convenience wrapper for a single synchronous write: claim, append,
    /// and mark done, retrying while busy until `timeout` elapses.
    pub fn add_fragment(&self, fragment: Fragment, timeout: Duration) -> Result<(), SmemError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.write_fragment_header(fragment.header, false) {
                WriteOutcome::Cursor(cursor) => {
                    let result = self.write_fragment_body(&cursor, fragment);
                    self.done_writing_fragment(&cursor);
                    return result;
                }
                WriteOutcome::Dropped => return Ok(()),
                WriteOutcome::Busy => {
                    if Instant::now() >= deadline {
                        return Err(SmemError::Busy);
                    }
                    std::thread::sleep(Duration::from_micros(200));
                }
            }
        }
    }

    /// Reap stale writing-state buffers as incomplete, then release any
    /// contiguous ascending run of completed sequence ids for which no
    /// smaller sequence id is still outstanding.
    pub fn check_pending_buffers(&self) {
        let mut seq = self.seq.lock();

        let mut to_force: Vec<(u64, usize)> = Vec::new();
        for (&sid, &idx) in seq.active.iter() {
            if seq.pending_release.contains(&sid) {
                continue;
            }
            let stale = {
                let buf = self.buffers[idx].lock();
                buf.is_stale(self.config.stale_buffer_timeout)
            };
            if stale {
                let missing = {
                    let mut buf = self.buffers[idx].lock();
                    let missing = self
                        .config
                        .expected_fragments_per_event
                        .saturating_sub(buf.distinct_fragment_ids.len());
                    buf.header.is_complete = false;
                    missing
                };
                to_force.push((sid, missing));
            }
        }
        for (sid, missing) in to_force {
            self.incomplete_count.fetch_add(1, Ordering::Relaxed);
            self.missing_fragment_counts.lock().insert(sid, missing);
            seq.pending_release.insert(sid);
        }

        loop {
            let next = match seq.pending_release.iter().next().copied() {
                Some(s) => s,
                None => break,
            };
            let smaller_still_writing = seq
                .active
                .keys()
                .any(|sid| !seq.pending_release.contains(sid) && *sid < next);
            if smaller_still_writing {
                break;
            }
            seq.pending_release.remove(&next);
            let idx = seq.active.remove(&next).expect("pending sequence has a buffer");
            self.buffers[idx].lock().state = BufferState::Full;
            seq.released.insert(next);
        }
    }

    /// Read the next event for `expected_sequence_id`, if it has reached
    /// `Full`. In non-broadcast mode the buffer is returned to the free
    /// list immediately; in broadcast mode it stays `Full` for other
    /// consumers and is never recycled by this call.
    pub fn read_next(&self, expected_sequence_id: u64) -> Option<ReleasedEvent> {
        for (idx, slot) in self.buffers.iter().enumerate() {
            let mut buf = slot.lock();
            if buf.state != BufferState::Full || buf.header.sequence_id != expected_sequence_id {
                continue;
            }
            let event = ReleasedEvent {
                run_id: buf.header.run_id,
                subrun_id: buf.header.subrun_id,
                sequence_id: buf.header.sequence_id,
                event_id: buf.header.event_id,
                is_complete: buf.header.is_complete,
                fragments: buf.fragments.clone(),
            };
            if self.config.broadcast_mode {
                return Some(event);
            }
            buf.state = BufferState::Empty;
            buf.fragments.clear();
            drop(buf);
            self.seq.lock().free.push_back(idx);
            return Some(event);
        }
        None
    }

    pub fn set_init_fragment(&self, fragment: Fragment) {
        *self.init_fragment.lock() = Some(fragment.clone());
        if let Err(err) = self.broadcast.broadcast(fragment) {
            log::warn!("failed to broadcast init fragment: {err}");
        }
    }

    pub fn init_fragment(&self) -> Option<Fragment> {
        self.init_fragment.lock().clone()
    }

    pub fn start_run(&self, run_id: u32) {
        self.run_id.store(run_id, Ordering::Release);
        self.subrun_id.store(1, Ordering::Release);
    }

    pub fn end_run(&self, sender_rank: i32, sequence_id: u64) {
        let fragment = Fragment::end_of_run(FragmentType::EndOfRun, sender_rank, sequence_id);
        if let Err(err) = self.broadcast.broadcast(fragment) {
            log::warn!("failed to broadcast end-of-run fragment: {err}");
        }
    }

    pub fn start_subrun(&self) {
        self.subrun_id.fetch_add(1, Ordering::AcqRel);
    }

    pub fn end_subrun(&self, sender_rank: i32, sequence_id: u64) {
        let fragment = Fragment::end_of_run(FragmentType::EndOfSubrun, sender_rank, sequence_id);
        if let Err(err) = self.broadcast.broadcast(fragment) {
            log::warn!("failed to broadcast end-of-subrun fragment: {err}");
        }
    }

    /// Arrange for the subrun id to be incremented at (or immediately
    /// before) the next buffer claimed for a sequence id `>= boundary_seq`.
    pub fn rollover_subrun(&self, boundary_seq: u64) {
        *self.subrun_boundary.lock() = Some(boundary_seq);
    }

    /// Flush all pending buffers, wait for consumers to drain, and
    /// broadcast the `EndOfData` control fragment. The wait deadline is
    /// `expected_art_event_processing_time_us * buffer_count`.
    pub fn end_of_data(&self, sender_rank: i32) {
        self.stopped.store(true, Ordering::Release);
        self.check_pending_buffers();
        let budget = self
            .config
            .expected_art_event_processing_time_us
            .saturating_mul(self.config.buffer_count as u64);
        let deadline = Instant::now() + Duration::from_micros(budget);
        while Instant::now() < deadline {
            let drained = self
                .buffers
                .iter()
                .all(|b| matches!(b.lock().state, BufferState::Empty));
            if drained {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        let fragment = Fragment::end_of_data(sender_rank, INVALID_FRAGMENT_ID, 0);
        if let Err(err) = self.broadcast.broadcast(fragment) {
            log::warn!("failed to broadcast end-of-data fragment: {err}");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn missing_fragment_count(&self, sequence_id: u64) -> Option<usize> {
        self.missing_fragment_counts.lock().get(&sequence_id).copied()
    }

    pub fn snapshot(&self) -> Vec<BufferSnapshot> {
        self.buffers
            .iter()
            .enumerate()
            .map(|(index, slot)| {
                let buf = slot.lock();
                BufferSnapshot {
                    index,
                    state: buf.state,
                    sequence_id: buf.header.sequence_id,
                    fragment_count: buf.fragments.len(),
                    is_complete: buf.header.is_complete,
                }
            })
            .collect()
    }
}
