// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Request receiver: decodes incoming request datagrams into a
//! `sequence_id -> timestamp` map and tracks end-of-run quiescence.

use crate::error::ReqProtoError;
use daq_proto::{RequestMessage, RequestMessageMode};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

struct State {
    requests: BTreeMap<u64, u64>,
    end_of_run_armed_at: Option<Instant>,
}

/// Accumulates requests seen across datagrams from one or more senders.
pub struct RequestReceiver {
    state: Mutex<State>,
    highest_seen_request: AtomicU64,
    end_of_run_quiet_timeout: Duration,
}

impl RequestReceiver {
    pub fn new(end_of_run_quiet_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State {
                requests: BTreeMap::new(),
                end_of_run_armed_at: None,
            }),
            highest_seen_request: AtomicU64::new(0),
            end_of_run_quiet_timeout,
        }
    }

    /// Decode and merge one request datagram. Requests below
    /// `highest_seen_request` are silently ignored (stale). Duplicates with
    /// a differing timestamp keep the oldest and are logged.
    pub fn ingest_datagram(&self, buf: &[u8]) -> Result<(), ReqProtoError> {
        let (header, packets) = RequestMessage::from_bytes(buf)?;
        let mut state = self.state.lock();
        for packet in packets {
            let highest = self.highest_seen_request.load(Ordering::Acquire);
            if packet.sequence_id < highest {
                continue;
            }
            match state.requests.get(&packet.sequence_id) {
                Some(&existing_ts) if existing_ts != packet.timestamp => {
                    log::warn!(
                        "duplicate request for sequence {} with conflicting timestamp ({} kept, {} dropped)",
                        packet.sequence_id,
                        existing_ts,
                        packet.timestamp
                    );
                }
                Some(_) => {}
                None => {
                    state.requests.insert(packet.sequence_id, packet.timestamp);
                    self.highest_seen_request.fetch_max(packet.sequence_id, Ordering::AcqRel);
                }
            }
        }
        if header.mode == RequestMessageMode::EndOfRun && state.end_of_run_armed_at.is_none() {
            state.end_of_run_armed_at = Some(Instant::now());
        }
        Ok(())
    }

    pub fn timestamp_for(&self, sequence_id: u64) -> Option<u64> {
        self.state.lock().requests.get(&sequence_id).copied()
    }

    pub fn highest_seen_request(&self) -> u64 {
        self.highest_seen_request.load(Ordering::Acquire)
    }

    pub fn is_end_of_run_armed(&self) -> bool {
        self.state.lock().end_of_run_armed_at.is_some()
    }

    /// True once an end-of-run has been armed and no further requests have
    /// arrived for at least `end_of_run_quiet_timeout`.
    pub fn quiescent(&self) -> bool {
        match self.state.lock().end_of_run_armed_at {
            Some(armed_at) => armed_at.elapsed() >= self.end_of_run_quiet_timeout,
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_proto::RequestMessage;

    fn datagram(pairs: &[(u64, u64)], mode: RequestMessageMode) -> Vec<u8> {
        let mut msg = RequestMessage::new(1);
        msg.set_mode(mode);
        for &(seq, ts) in pairs {
            msg.add_request(seq, ts);
        }
        msg.to_bytes().unwrap()
    }

    #[test]
    fn ingest_tracks_highest_seen_and_timestamps() {
        let receiver = RequestReceiver::new(Duration::from_millis(50));
        receiver
            .ingest_datagram(&datagram(&[(1, 10), (2, 20)], RequestMessageMode::Normal))
            .unwrap();
        assert_eq!(receiver.timestamp_for(1), Some(10));
        assert_eq!(receiver.highest_seen_request(), 2);
    }

    #[test]
    fn stale_requests_below_highest_seen_are_ignored() {
        let receiver = RequestReceiver::new(Duration::from_millis(50));
        receiver
            .ingest_datagram(&datagram(&[(5, 50)], RequestMessageMode::Normal))
            .unwrap();
        receiver
            .ingest_datagram(&datagram(&[(2, 20)], RequestMessageMode::Normal))
            .unwrap();
        assert!(receiver.timestamp_for(2).is_none());
    }

    #[test]
    fn duplicate_with_conflicting_timestamp_keeps_oldest() {
        let receiver = RequestReceiver::new(Duration::from_millis(50));
        receiver
            .ingest_datagram(&datagram(&[(1, 10)], RequestMessageMode::Normal))
            .unwrap();
        receiver
            .ingest_datagram(&datagram(&[(1, 999)], RequestMessageMode::Normal))
            .unwrap();
        assert_eq!(receiver.timestamp_for(1), Some(10));
    }

    #[test]
    fn end_of_run_arms_and_becomes_quiescent_after_timeout() {
        let receiver = RequestReceiver::new(Duration::from_millis(20));
        receiver.ingest_datagram(&datagram(&[], RequestMessageMode::EndOfRun)).unwrap();
        assert!(receiver.is_end_of_run_armed());
        assert!(!receiver.quiescent());
        std::thread::sleep(Duration::from_millis(30));
        assert!(receiver.quiescent());
    }
}
