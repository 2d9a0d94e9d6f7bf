// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Coalescing request sender: batches `(sequence_id, timestamp)` pairs and
//! emits a single `RequestMessage` datagram after a short delay instead of
//! one datagram per request.

use daq_proto::{RequestMessage, RequestMessageMode};
use parking_lot::Mutex;
use std::time::Duration;

/// Accumulates pending requests for a rank. Call [`RequestSender::queue_request`]
/// as new requests arrive and [`RequestSender::flush`] once `request_delay`
/// has elapsed (or immediately after `set_mode(EndOfRun)`) to obtain the
/// datagram bytes to send.
pub struct RequestSender {
    rank: i32,
    request_delay: Duration,
    pending: Mutex<RequestMessage>,
}

impl RequestSender {
    pub fn new(rank: i32, request_delay: Duration) -> Self {
        Self {
            rank,
            request_delay,
            pending: Mutex::new(RequestMessage::new(rank)),
        }
    }

    pub fn request_delay(&self) -> Duration {
        self.request_delay
    }

    pub fn queue_request(&self, sequence_id: u64, timestamp: u64) {
        self.pending.lock().add_request(sequence_id, timestamp);
    }

    /// Forces end-of-run mode: every message from now on (including the one
    /// about to be flushed) is tagged `EndOfRun`, and the caller is expected
    /// to flush immediately rather than waiting for the coalescing delay.
    pub fn set_end_of_run(&self) {
        self.pending.lock().set_mode(RequestMessageMode::EndOfRun);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    /// Serialize and clear the accumulated requests. Returns `None` if
    /// there was nothing queued.
    pub fn flush(&self) -> Option<Vec<u8>> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return None;
        }
        let bytes = pending.to_bytes().ok()?;
        let mode = pending.mode();
        pending.clear();
        pending.set_mode(mode);
        Some(bytes)
    }

    pub fn rank(&self) -> i32 {
        self.rank
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_returns_none_when_empty() {
        let sender = RequestSender::new(1, Duration::from_millis(10));
        assert!(sender.flush().is_none());
    }

    #[test]
    fn queued_requests_are_batched_into_one_datagram() {
        let sender = RequestSender::new(1, Duration::from_millis(10));
        sender.queue_request(1, 100);
        sender.queue_request(2, 200);
        let bytes = sender.flush().expect("should have pending requests");
        let (header, packets) = RequestMessage::from_bytes(&bytes).unwrap();
        assert_eq!(header.packet_count, 2);
        assert_eq!(packets[0].sequence_id, 1);
        assert_eq!(packets[1].sequence_id, 2);
        assert!(sender.flush().is_none(), "queue should be empty after flush");
    }

    #[test]
    fn end_of_run_mode_persists_across_flushes() {
        let sender = RequestSender::new(1, Duration::from_millis(10));
        sender.queue_request(1, 100);
        sender.set_end_of_run();
        let bytes = sender.flush().unwrap();
        let (header, _) = RequestMessage::from_bytes(&bytes).unwrap();
        assert_eq!(header.mode, RequestMessageMode::EndOfRun);

        sender.queue_request(2, 200);
        let bytes = sender.flush().unwrap();
        let (header, _) = RequestMessage::from_bytes(&bytes).unwrap();
        assert_eq!(header.mode, RequestMessageMode::EndOfRun);
    }
}
