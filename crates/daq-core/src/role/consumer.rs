// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The analysis-facing role: drains completed events from a builder's
//! event manager in strict sequence order.

use crate::config::ConsumerConfig;
use daq_smem::{ReleasedEvent, SmemEventManager};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Reads events released by a [`SmemEventManager`] in ascending
/// `sequence_id` order, tracking its own read cursor across calls.
pub struct Consumer {
    rank: i32,
    manager: Arc<SmemEventManager>,
    next_sequence_id: AtomicU64,
    restart_on_crash: bool,
}

impl Consumer {
    pub fn new(config: &ConsumerConfig, manager: Arc<SmemEventManager>) -> Self {
        Self {
            rank: config.rank,
            manager,
            next_sequence_id: AtomicU64::new(0),
            restart_on_crash: config.restart_on_crash,
        }
    }

    pub fn rank(&self) -> i32 {
        self.rank
    }

    pub fn restart_on_crash(&self) -> bool {
        self.restart_on_crash
    }

    /// Try to read the next event in sequence. Returns `None` if it isn't
    /// released yet; the caller retries on its own cadence.
    pub fn poll_next(&self) -> Option<ReleasedEvent> {
        let expected = self.next_sequence_id.load(Ordering::Acquire);
        let event = self.manager.read_next(expected)?;
        self.next_sequence_id.store(event.sequence_id + 1, Ordering::Release);
        Some(event)
    }

    /// True once the manager has been told to stop and no event remains
    /// at the consumer's current cursor.
    pub fn is_drained(&self) -> bool {
        self.manager.is_stopped() && self.manager.read_next(self.next_sequence_id.load(Ordering::Acquire)).is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_proto::{Fragment, FragmentHeader, FragmentType};
    use daq_smem::{BroadcastRing, BroadcastConfig, SmemConfig, WriteOutcome};

    fn manager() -> Arc<SmemEventManager> {
        let config = SmemConfig { expected_fragments_per_event: 1, ..SmemConfig::default() };
        Arc::new(SmemEventManager::new(config, BroadcastRing::new(BroadcastConfig::default())))
    }

    fn push(mgr: &SmemEventManager, sequence_id: u64) {
        let header = FragmentHeader {
            word_count: 6,
            sequence_id,
            timestamp: sequence_id,
            fragment_id: 0,
            fragment_type: FragmentType::Data,
            metadata_word_count: 0,
        };
        match mgr.write_fragment_header(header, false) {
            WriteOutcome::Cursor(cursor) => {
                mgr.write_fragment_body(&cursor, Fragment::new(sequence_id, 0, sequence_id, FragmentType::Data, vec![], vec![1])).unwrap();
                mgr.done_writing_fragment(&cursor);
            }
            other => panic!("unexpected {other:?}"),
        }
        mgr.check_pending_buffers();
    }

    #[test]
    fn consumer_reads_events_in_order_and_advances_its_cursor() {
        let mgr = manager();
        push(&mgr, 1);
        push(&mgr, 2);

        let consumer = Consumer::new(&ConsumerConfig { rank: 9, restart_on_crash: true }, mgr);
        let first = consumer.poll_next().expect("sequence 1 ready");
        assert_eq!(first.sequence_id, 1);
        let second = consumer.poll_next().expect("sequence 2 ready");
        assert_eq!(second.sequence_id, 2);
        assert!(consumer.poll_next().is_none());
    }

    #[test]
    fn is_drained_once_stopped_and_cursor_caught_up() {
        let mgr = manager();
        push(&mgr, 1);
        let consumer = Consumer::new(&ConsumerConfig { rank: 9, restart_on_crash: false }, mgr.clone());
        assert!(!consumer.is_drained());
        consumer.poll_next().unwrap();
        mgr.end_of_data(1);
        assert!(consumer.is_drained());
    }
}
