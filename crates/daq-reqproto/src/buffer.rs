// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A generator's local ring of recently produced fragments, ordered by
//! timestamp, used to answer requests.

use daq_proto::Fragment;
use std::collections::VecDeque;

pub struct FragmentBuffer {
    depth: usize,
    circular: bool,
    fragments: VecDeque<Fragment>,
}

impl FragmentBuffer {
    pub fn new(depth: usize, circular: bool) -> Self {
        Self {
            depth: depth.max(1),
            circular,
            fragments: VecDeque::new(),
        }
    }

    /// Append a fragment. In circular mode, the oldest fragment is dropped
    /// once the buffer exceeds its configured depth.
    pub fn push(&mut self, fragment: Fragment) {
        self.fragments.push_back(fragment);
        if self.circular {
            while self.fragments.len() > self.depth {
                self.fragments.pop_front();
            }
        }
    }

    pub fn timestamp_span(&self) -> Option<(u64, u64)> {
        let front = self.fragments.front()?.header.timestamp;
        let back = self.fragments.back()?.header.timestamp;
        Some((front, back))
    }

    pub fn fragment_at_timestamp(&self, timestamp: u64) -> Option<&Fragment> {
        self.fragments.iter().find(|f| f.header.timestamp == timestamp)
    }

    pub fn timestamps_in_range(&self, lo: u64, hi: u64) -> Vec<u64> {
        self.fragments
            .iter()
            .map(|f| f.header.timestamp)
            .filter(|&ts| ts >= lo && ts < hi)
            .collect()
    }

    pub fn fragments_in_range(&self, lo: u64, hi: u64) -> Vec<Fragment> {
        self.fragments
            .iter()
            .filter(|f| f.header.timestamp >= lo && f.header.timestamp < hi)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Fragment> {
        self.fragments.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_proto::FragmentType;

    fn frag(ts: u64) -> Fragment {
        Fragment::new(ts, 0, ts, FragmentType::Data, vec![], vec![])
    }

    #[test]
    fn circular_mode_drops_oldest_beyond_depth() {
        let mut buffer = FragmentBuffer::new(2, true);
        buffer.push(frag(1));
        buffer.push(frag(2));
        buffer.push(frag(3));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.timestamp_span(), Some((2, 3)));
    }

    #[test]
    fn non_circular_mode_retains_everything() {
        let mut buffer = FragmentBuffer::new(2, false);
        buffer.push(frag(1));
        buffer.push(frag(2));
        buffer.push(frag(3));
        assert_eq!(buffer.len(), 3);
    }
}
