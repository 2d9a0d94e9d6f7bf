// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Assignment policies: how a batch of free-slot tokens becomes a routing
//! table for the next cycle. Kept as tagged variants behind one trait
//! rather than a class hierarchy, since there are only four and none need
//! more than a sliver of persistent state.

use crate::config::PolicyConfig;
use crate::token::TokenBatch;

/// One `(sequence_id, destination_rank)` assignment produced by a policy.
pub type Assignment = (u64, i32);

/// Builds the next routing table from a batch of available tokens.
/// Implementations remove the tokens they use from `batch`; whatever is
/// left when `apply` returns goes back into the pool for the next cycle.
pub trait RoutingPolicy: Send {
    fn name(&self) -> &'static str;
    fn apply(&mut self, batch: &mut TokenBatch, next_sequence_id: u64) -> Vec<Assignment>;
}

pub fn from_config(config: &PolicyConfig, receivers: &[i32]) -> Box<dyn RoutingPolicy> {
    match config {
        PolicyConfig::NoOp => Box::new(NoOpPolicy),
        PolicyConfig::RoundRobin { minimum_participants } => {
            Box::new(RoundRobinPolicy::new(*minimum_participants, receivers.to_vec()))
        }
        PolicyConfig::CapacityTest { percent } => Box::new(CapacityTestPolicy::new(*percent, receivers.to_vec())),
        PolicyConfig::NthEvent { n, target } => Box::new(NthEventPolicy::new(*n, *target, receivers.to_vec())),
    }
}

/// Emits entries in arrival order of tokens, one `sequence_id` per token.
pub struct NoOpPolicy;

impl RoutingPolicy for NoOpPolicy {
    fn name(&self) -> &'static str {
        "no-op"
    }

    fn apply(&mut self, batch: &mut TokenBatch, next_sequence_id: u64) -> Vec<Assignment> {
        let mut entries = Vec::new();
        let mut seq = next_sequence_id;
        while let Some(rank) = batch.pop_front() {
            entries.push((seq, rank));
            seq += 1;
        }
        entries
    }
}

/// Waits until at least `M` configured receivers hold a token, then emits
/// full round-robin turns across every token-holder until one runs dry.
pub struct RoundRobinPolicy {
    minimum_participants: i32,
    receivers: Vec<i32>,
}

impl RoundRobinPolicy {
    pub fn new(minimum_participants: i32, receivers: Vec<i32>) -> Self {
        Self { minimum_participants, receivers }
    }

    /// `minimum_participants` may be negative, meaning
    /// `|receivers| + minimum_participants`, floored at 1.
    fn resolved_minimum(&self) -> usize {
        if self.minimum_participants < 0 {
            let relaxed = self.receivers.len() as i64 + self.minimum_participants as i64;
            relaxed.max(1) as usize
        } else {
            self.minimum_participants.max(1) as usize
        }
    }
}

impl RoutingPolicy for RoundRobinPolicy {
    fn name(&self) -> &'static str {
        "round-robin"
    }

    fn apply(&mut self, batch: &mut TokenBatch, next_sequence_id: u64) -> Vec<Assignment> {
        let counts = batch.counts();
        let ready: Vec<i32> = self
            .receivers
            .iter()
            .copied()
            .filter(|r| counts.get(r).copied().unwrap_or(0) > 0)
            .collect();
        if ready.len() < self.resolved_minimum() {
            return Vec::new();
        }
        let turns = ready.iter().map(|r| counts[r]).min().unwrap_or(0);
        let mut entries = Vec::new();
        let mut seq = next_sequence_id;
        for _ in 0..turns {
            for &rank in &ready {
                if batch.take_rank(rank) {
                    entries.push((seq, rank));
                    seq += 1;
                }
            }
        }
        entries
    }
}

/// Fills receivers in configured order, each taking its full available
/// share, until `ceil(total_tokens * percent / 100)` tokens are assigned.
pub struct CapacityTestPolicy {
    percent: u32,
    receivers: Vec<i32>,
}

impl CapacityTestPolicy {
    pub fn new(percent: u32, receivers: Vec<i32>) -> Self {
        Self { percent, receivers }
    }
}

impl RoutingPolicy for CapacityTestPolicy {
    fn name(&self) -> &'static str {
        "capacity-test"
    }

    fn apply(&mut self, batch: &mut TokenBatch, next_sequence_id: u64) -> Vec<Assignment> {
        let total = batch.total() as u64;
        if total == 0 {
            return Vec::new();
        }
        let target = (total * self.percent as u64).div_ceil(100);
        let mut entries = Vec::new();
        let mut seq = next_sequence_id;
        'receivers: for &rank in &self.receivers {
            while (entries.len() as u64) < target {
                if batch.take_rank(rank) {
                    entries.push((seq, rank));
                    seq += 1;
                } else {
                    continue 'receivers;
                }
            }
            break;
        }
        entries
    }
}

/// Every `sequence_id` with `seq % n == 0` is routed to `target`; every
/// other sequence round-robins across the remaining configured receivers.
/// The rotation cursor persists across cycles so a turn interrupted by a
/// multiple of `n` resumes where it left off next cycle.
pub struct NthEventPolicy {
    n: u64,
    target: i32,
    others: Vec<i32>,
    cursor: usize,
}

impl NthEventPolicy {
    pub fn new(n: u64, target: i32, receivers: Vec<i32>) -> Self {
        let others: Vec<i32> = receivers.into_iter().filter(|&r| r != target).collect();
        Self { n: n.max(1), target, others, cursor: 0 }
    }
}

impl RoutingPolicy for NthEventPolicy {
    fn name(&self) -> &'static str {
        "nth-event"
    }

    fn apply(&mut self, batch: &mut TokenBatch, next_sequence_id: u64) -> Vec<Assignment> {
        let mut entries = Vec::new();
        let mut seq = next_sequence_id;
        loop {
            if seq % self.n == 0 {
                if batch.take_rank(self.target) {
                    entries.push((seq, self.target));
                    seq += 1;
                } else {
                    break;
                }
            } else if self.others.is_empty() {
                break;
            } else {
                let mut assigned = None;
                for _ in 0..self.others.len() {
                    let candidate = self.others[self.cursor];
                    self.cursor = (self.cursor + 1) % self.others.len();
                    if batch.take_rank(candidate) {
                        assigned = Some(candidate);
                        break;
                    }
                }
                match assigned {
                    Some(rank) => {
                        entries.push((seq, rank));
                        seq += 1;
                    }
                    None => break,
                }
            }
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenPool;

    fn batch_of(tokens: &[(i32, u32)]) -> TokenBatch {
        let mut pool = TokenPool::new();
        for &(rank, count) in tokens {
            pool.ingest(rank, count);
        }
        pool.drain()
    }

    #[test]
    fn no_op_assigns_one_sequence_per_token_in_arrival_order() {
        let mut batch = batch_of(&[(1, 1), (2, 1), (1, 1)]);
        let mut policy = NoOpPolicy;
        let entries = policy.apply(&mut batch, 10);
        assert_eq!(entries, vec![(10, 1), (11, 2), (12, 1)]);
    }

    #[test]
    fn round_robin_emits_full_turns_scenario() {
        let mut batch = batch_of(&[(1, 1), (2, 1), (3, 1), (4, 1)]);
        let mut policy = RoundRobinPolicy::new(4, vec![1, 2, 3, 4]);
        let entries = policy.apply(&mut batch, 1);
        assert_eq!(entries, vec![(1, 1), (2, 2), (3, 3), (4, 4)]);
        assert!(batch.is_empty());
    }

    #[test]
    fn round_robin_waits_for_minimum_participants() {
        let mut batch = batch_of(&[(1, 1)]);
        let mut policy = RoundRobinPolicy::new(2, vec![1, 2]);
        let entries = policy.apply(&mut batch, 1);
        assert!(entries.is_empty());
        assert_eq!(batch.total(), 1, "tokens are left untouched when waiting");
    }

    #[test]
    fn round_robin_negative_minimum_is_relative_to_receiver_count() {
        // |receivers|=4, minimum=-1 => resolved minimum = 3
        let mut policy = RoundRobinPolicy::new(-1, vec![1, 2, 3, 4]);
        assert_eq!(policy.resolved_minimum(), 3);
        let mut batch = batch_of(&[(1, 1), (2, 1), (3, 1)]);
        let entries = policy.apply(&mut batch, 1);
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn capacity_test_fills_to_target_in_receiver_order() {
        let mut batch = batch_of(&[(1, 3), (2, 3), (3, 3)]);
        // total = 9, 50% => ceil(4.5) = 5
        let mut policy = CapacityTestPolicy::new(50, vec![1, 2, 3]);
        let entries = policy.apply(&mut batch, 1);
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].1, 1);
        assert_eq!(entries[3].1, 2);
    }

    #[test]
    fn nth_event_straddles_target_at_exact_multiples() {
        let mut batch = batch_of(&[(1, 1), (2, 1), (3, 1)]);
        let mut policy = NthEventPolicy::new(3, 3, vec![1, 2, 3]);
        let entries = policy.apply(&mut batch, 1);
        assert_eq!(entries, vec![(1, 1), (2, 2), (3, 3)]);

        let mut batch = batch_of(&[(1, 1), (2, 1), (3, 1)]);
        let entries = policy.apply(&mut batch, 4);
        assert_eq!(entries, vec![(4, 1), (5, 2), (6, 3)]);
    }

    #[test]
    fn nth_event_stops_when_target_token_missing_at_boundary() {
        let mut batch = batch_of(&[(1, 1), (2, 1)]);
        let mut policy = NthEventPolicy::new(3, 3, vec![1, 2, 3]);
        let entries = policy.apply(&mut batch, 1);
        assert_eq!(entries, vec![(1, 1), (2, 2)]);
    }

    #[test]
    fn policies_emit_strictly_monotonic_contiguous_sequence_ids() {
        let mut batch = batch_of(&[(1, 2), (2, 2)]);
        let mut policy = NoOpPolicy;
        let entries = policy.apply(&mut batch, 100);
        let seqs: Vec<u64> = entries.iter().map(|(s, _)| *s).collect();
        for window in seqs.windows(2) {
            assert_eq!(window[1], window[0] + 1);
        }
    }
}
