// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Ties a local fragment buffer to a [`WindowMode`] policy, answering
//! requests with `Container`/`Empty` fragments.

use crate::buffer::FragmentBuffer;
use crate::window::{WindowMode, WindowOutcome};
use daq_proto::{Fragment, FragmentType, INVALID_FRAGMENT_ID};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

struct PendingWindow {
    sequence_id: u64,
    timestamp: u64,
    first_seen: Instant,
}

pub struct GeneratorConfig {
    pub window_close_timeout: Duration,
    pub missing_request_window_timeout: Duration,
    pub data_buffer_depth_fragments: usize,
    pub circular_buffer_mode: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            window_close_timeout: Duration::from_millis(500),
            missing_request_window_timeout: Duration::from_secs(5),
            data_buffer_depth_fragments: 1000,
            circular_buffer_mode: true,
        }
    }
}

/// Answers requests against a local fragment buffer according to a
/// configured [`WindowMode`].
pub struct CommandableFragmentGenerator {
    mode: WindowMode,
    buffer: Mutex<FragmentBuffer>,
    config: GeneratorConfig,
    pending: Mutex<VecDeque<PendingWindow>>,
}

impl CommandableFragmentGenerator {
    pub fn new(mode: WindowMode, config: GeneratorConfig) -> Self {
        let buffer = FragmentBuffer::new(config.data_buffer_depth_fragments, config.circular_buffer_mode);
        Self {
            mode,
            buffer: Mutex::new(buffer),
            config,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub fn mode(&self) -> WindowMode {
        self.mode
    }

    pub fn push_fragment(&self, fragment: Fragment) {
        self.buffer.lock().push(fragment);
    }

    /// Attempt to answer a request now. Returns `None` in `Ignored` mode
    /// (no response is gated on requests) or when a `Window` request must
    /// still wait for more data.
    pub fn respond(&self, sequence_id: u64, timestamp: u64) -> Option<Fragment> {
        match self.mode {
            WindowMode::Ignored => None,
            WindowMode::Single => {
                let buffer = self.buffer.lock();
                Some(match buffer.fragment_at_timestamp(timestamp) {
                    Some(fragment) => fragment.clone(),
                    None => Fragment::empty(sequence_id, timestamp, INVALID_FRAGMENT_ID),
                })
            }
            WindowMode::Buffer => {
                let buffer = self.buffer.lock();
                Some(container_fragment(sequence_id, timestamp, buffer.all(), false))
            }
            WindowMode::Window { offset, width } => self.respond_window(sequence_id, timestamp, offset, width),
        }
    }

    fn respond_window(&self, sequence_id: u64, timestamp: u64, offset: i64, width: u64) -> Option<Fragment> {
        let elapsed = self.mark_pending(sequence_id, timestamp);
        let timed_out = elapsed >= self.config.window_close_timeout;
        let buffer = self.buffer.lock();
        match WindowMode::evaluate_window(offset, width, timestamp, &buffer, timed_out) {
            WindowOutcome::Ready { missing_data, .. } => {
                let lo = timestamp.wrapping_add_signed(offset);
                let hi = lo.saturating_add(width);
                let fragments = buffer.fragments_in_range(lo, hi);
                drop(buffer);
                self.clear_pending(sequence_id);
                Some(container_fragment(sequence_id, timestamp, fragments, missing_data))
            }
            WindowOutcome::Pending => None,
        }
    }

    fn mark_pending(&self, sequence_id: u64, timestamp: u64) -> Duration {
        let mut pending = self.pending.lock();
        if let Some(entry) = pending.iter().find(|p| p.sequence_id == sequence_id) {
            entry.first_seen.elapsed()
        } else {
            pending.push_back(PendingWindow {
                sequence_id,
                timestamp,
                first_seen: Instant::now(),
            });
            Duration::ZERO
        }
    }

    fn clear_pending(&self, sequence_id: u64) {
        self.pending.lock().retain(|p| p.sequence_id != sequence_id);
    }

    /// Release any pending window requests older than
    /// `missing_request_window_timeout`, regardless of whether more data
    /// might still arrive. Call periodically from the generator's polling
    /// loop.
    pub fn reap_stale_pending(&self) -> Vec<Fragment> {
        let timeout = self.config.missing_request_window_timeout;
        let mut pending = self.pending.lock();
        let mut released = Vec::new();
        pending.retain(|entry| {
            if entry.first_seen.elapsed() >= timeout {
                released.push(container_fragment(entry.sequence_id, entry.timestamp, vec![], true));
                false
            } else {
                true
            }
        });
        released
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

fn container_fragment(sequence_id: u64, timestamp: u64, fragments: Vec<Fragment>, missing_data: bool) -> Fragment {
    let fragment_type = if fragments.is_empty() { FragmentType::Empty } else { FragmentType::Container };
    let mut metadata = vec![missing_data as u8];
    let mut payload = Vec::new();
    for f in &fragments {
        payload.extend_from_slice(&f.header.to_bytes());
        payload.extend_from_slice(&f.metadata);
        payload.extend_from_slice(&f.payload);
    }
    metadata.extend_from_slice(&(fragments.len() as u32).to_le_bytes());
    Fragment::new(sequence_id, INVALID_FRAGMENT_ID, timestamp, fragment_type, metadata, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_proto::FragmentType;

    fn push_ts(gen: &CommandableFragmentGenerator, ts: u64) {
        gen.push_fragment(Fragment::new(ts, 0, ts, FragmentType::Data, vec![], vec![ts as u8]));
    }

    #[test]
    fn ignored_mode_never_responds() {
        let gen = CommandableFragmentGenerator::new(WindowMode::Ignored, GeneratorConfig::default());
        push_ts(&gen, 1);
        assert!(gen.respond(1, 1).is_none());
    }

    #[test]
    fn single_mode_returns_exact_match_or_empty() {
        let gen = CommandableFragmentGenerator::new(WindowMode::Single, GeneratorConfig::default());
        push_ts(&gen, 5);
        let hit = gen.respond(1, 5).unwrap();
        assert_eq!(hit.header.fragment_type, FragmentType::Data);
        let miss = gen.respond(2, 9).unwrap();
        assert_eq!(miss.header.fragment_type, FragmentType::Empty);
    }

    #[test]
    fn buffer_mode_emits_everything_as_a_container() {
        let gen = CommandableFragmentGenerator::new(WindowMode::Buffer, GeneratorConfig::default());
        push_ts(&gen, 1);
        push_ts(&gen, 2);
        let container = gen.respond(1, 0).unwrap();
        assert_eq!(container.header.fragment_type, FragmentType::Container);
    }

    #[test]
    fn window_mode_times_out_to_empty_container() {
        let config = GeneratorConfig {
            window_close_timeout: Duration::from_millis(10),
            ..GeneratorConfig::default()
        };
        let gen = CommandableFragmentGenerator::new(WindowMode::Window { offset: 0, width: 3 }, config);
        push_ts(&gen, 2);
        push_ts(&gen, 3);
        push_ts(&gen, 4);
        push_ts(&gen, 5);
        push_ts(&gen, 6);
        assert!(gen.respond(1, 8).is_none(), "should be pending, window not yet covered");
        std::thread::sleep(Duration::from_millis(15));
        let result = gen.respond(1, 8).unwrap();
        assert_eq!(result.header.fragment_type, FragmentType::Empty);
        assert_eq!(gen.pending_count(), 0);
    }

    #[test]
    fn window_mode_hit_returns_container_without_waiting() {
        let gen = CommandableFragmentGenerator::new(WindowMode::Window { offset: 0, width: 3 }, GeneratorConfig::default());
        for ts in 2..=6 {
            push_ts(&gen, ts);
        }
        let result = gen.respond(1, 3).unwrap();
        assert_eq!(result.header.fragment_type, FragmentType::Container);
    }
}
