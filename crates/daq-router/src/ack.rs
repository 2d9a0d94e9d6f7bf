// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tracks which configured senders have acknowledged the table currently
//! in flight, and when a retransmit is due.

use daq_proto::RoutingAckPacket;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

pub struct AckTracker {
    expected: BTreeSet<i32>,
    pending: BTreeSet<i32>,
    first_sequence_id: u64,
    last_sequence_id: u64,
    retries_remaining: u32,
    last_send: Instant,
}

impl AckTracker {
    /// Start tracking acks for a freshly multicast table. `expected` is the
    /// configured set of senders that must ack.
    pub fn start(expected: &[i32], first_sequence_id: u64, last_sequence_id: u64, max_retries: u32) -> Self {
        let expected: BTreeSet<i32> = expected.iter().copied().collect();
        Self {
            pending: expected.clone(),
            expected,
            first_sequence_id,
            last_sequence_id,
            retries_remaining: max_retries,
            last_send: Instant::now(),
        }
    }

    /// Record an ack. Ignored if it doesn't match the in-flight table's
    /// sequence range (a stale ack for a previous cycle).
    pub fn record(&mut self, ack: RoutingAckPacket) {
        if ack.first_sequence_id == self.first_sequence_id && ack.last_sequence_id == self.last_sequence_id {
            self.pending.remove(&ack.rank);
        }
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn missing(&self) -> Vec<i32> {
        self.pending.iter().copied().collect()
    }

    /// Whether a retransmit should fire now, given the retry cadence
    /// `current_table_interval_ms / max_ack_cycle_count`.
    pub fn retransmit_due(&self, retry_interval: Duration) -> bool {
        !self.is_complete() && self.retries_remaining > 0 && self.last_send.elapsed() >= retry_interval
    }

    /// Mark that a retransmit was just sent, consuming one retry.
    pub fn mark_retransmitted(&mut self) {
        self.retries_remaining = self.retries_remaining.saturating_sub(1);
        self.last_send = Instant::now();
    }

    pub fn retries_exhausted(&self) -> bool {
        !self.is_complete() && self.retries_remaining == 0
    }

    pub fn expected(&self) -> &BTreeSet<i32> {
        &self.expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acks_matching_sequence_range_clear_pending() {
        let mut tracker = AckTracker::start(&[1, 2], 10, 20, 3);
        assert!(!tracker.is_complete());
        tracker.record(RoutingAckPacket { rank: 1, first_sequence_id: 10, last_sequence_id: 20 });
        assert_eq!(tracker.missing(), vec![2]);
        tracker.record(RoutingAckPacket { rank: 2, first_sequence_id: 10, last_sequence_id: 20 });
        assert!(tracker.is_complete());
    }

    #[test]
    fn stale_ack_for_different_range_is_ignored() {
        let mut tracker = AckTracker::start(&[1], 10, 20, 3);
        tracker.record(RoutingAckPacket { rank: 1, first_sequence_id: 1, last_sequence_id: 2 });
        assert!(!tracker.is_complete());
    }

    #[test]
    fn retries_exhaust_after_max_retransmits() {
        let mut tracker = AckTracker::start(&[1], 10, 20, 2);
        tracker.mark_retransmitted();
        assert!(!tracker.retries_exhausted());
        tracker.mark_retransmitted();
        assert!(tracker.retries_exhausted());
    }
}
