// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The secondary broadcast ring used for control fragments (Init,
//! EndOfRun, EndOfSubrun, EndOfData, Shutdown). Every consumer sees every
//! broadcast fragment, unlike the main event ring where each event goes
//! to exactly one consumer.

use crate::config::BroadcastConfig;
use crate::error::SmemError;
use daq_proto::Fragment;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A small, fixed-capacity FIFO of control fragments. Unlike the main
/// event ring, entries are not keyed by sequence id and every consumer is
/// expected to drain the same stream independently (callers keep their
/// own read cursor via repeated `drain()` calls in this simplified
/// single-process model).
pub struct BroadcastRing {
    config: BroadcastConfig,
    slots: Mutex<VecDeque<Fragment>>,
}

impl BroadcastRing {
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            slots: Mutex::new(VecDeque::with_capacity(config.buffer_count)),
            config,
        }
    }

    /// Push a control fragment, waiting up to the configured timeout for
    /// room if the ring is full. On timeout the caller is expected to
    /// `clear()` and retry.
    pub fn broadcast(&self, fragment: Fragment) -> Result<(), SmemError> {
        let deadline = Instant::now() + self.config.timeout;
        loop {
            {
                let mut slots = self.slots.lock();
                if slots.len() < self.config.buffer_count {
                    slots.push_back(fragment);
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(SmemError::BroadcastTimeout);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Drain all currently queued control fragments, in arrival order.
    pub fn drain(&self) -> Vec<Fragment> {
        self.slots.lock().drain(..).collect()
    }

    /// Discard all queued fragments, freeing the ring for more broadcasts
    /// after a timeout.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_proto::FragmentType;

    fn frag(t: FragmentType) -> Fragment {
        Fragment::new(0, 0, 0, t, vec![], vec![])
    }

    #[test]
    fn broadcast_and_drain_preserves_order() {
        let ring = BroadcastRing::new(BroadcastConfig {
            buffer_count: 4,
            timeout: Duration::from_millis(50),
        });
        ring.broadcast(frag(FragmentType::Init)).unwrap();
        ring.broadcast(frag(FragmentType::EndOfRun)).unwrap();
        let drained = ring.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].header.fragment_type, FragmentType::Init);
        assert_eq!(drained[1].header.fragment_type, FragmentType::EndOfRun);
        assert!(ring.is_empty());
    }

    #[test]
    fn full_ring_times_out_then_clear_allows_retry() {
        let ring = BroadcastRing::new(BroadcastConfig {
            buffer_count: 1,
            timeout: Duration::from_millis(20),
        });
        ring.broadcast(frag(FragmentType::Init)).unwrap();
        assert!(matches!(
            ring.broadcast(frag(FragmentType::Shutdown)),
            Err(SmemError::BroadcastTimeout)
        ));
        ring.clear();
        assert!(ring.broadcast(frag(FragmentType::Shutdown)).is_ok());
    }
}
