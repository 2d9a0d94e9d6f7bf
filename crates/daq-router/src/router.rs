// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Ties the token pool, the configured policy and the adaptive interval
//! together into one table-building cycle. Deliberately free of sockets so
//! the core decision logic is unit-testable; [`crate::net`] wires it to
//! real TCP/UDP endpoints.

use daq_proto::{RoutingMode, RoutingToken};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::RouterConfig;
use crate::interval::AdaptiveInterval;
use crate::policy::{self, Assignment, RoutingPolicy};
use crate::token::TokenPool;

/// Output of one table-building cycle, ready to be serialized onto the
/// wire by the caller.
pub struct Cycle {
    pub entries: Vec<Assignment>,
    pub mode: RoutingMode,
    pub interval_ms: u64,
}

impl Cycle {
    pub fn first_sequence_id(&self) -> Option<u64> {
        self.entries.first().map(|(seq, _)| *seq)
    }

    pub fn last_sequence_id(&self) -> Option<u64> {
        self.entries.last().map(|(seq, _)| *seq)
    }
}

pub struct Router {
    config: RouterConfig,
    policy: Mutex<Box<dyn RoutingPolicy>>,
    tokens: Mutex<TokenPool>,
    interval: Mutex<AdaptiveInterval>,
    next_sequence_id: AtomicU64,
    /// In `RouteBySendCount` mode, a token from rank R only reaches the
    /// policy once every configured sender has routed one token through R;
    /// this counts how many senders have contributed to R's current slot.
    send_count_contributions: Mutex<std::collections::BTreeMap<i32, usize>>,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        let policy = policy::from_config(&config.policy, &config.receivers);
        let interval = AdaptiveInterval::new(config.max_table_update_interval_ms);
        Self {
            config,
            policy: Mutex::new(policy),
            tokens: Mutex::new(TokenPool::new()),
            interval: Mutex::new(interval),
            next_sequence_id: AtomicU64::new(0),
            send_count_contributions: Mutex::new(std::collections::BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn mode(&self) -> RoutingMode {
        RoutingMode::from(self.config.mode)
    }

    /// Record a `RoutingToken` arriving over a builder's TCP connection.
    /// In `RouteBySendCount` mode, a rank's slot is only admitted to the
    /// pool once every configured sender has routed a fragment through it
    /// since its last slot; otherwise tokens are admitted immediately.
    pub fn ingest_token(&self, token: RoutingToken) {
        match self.mode() {
            RoutingMode::RouteBySendCount => {
                let senders = self.config.senders.len().max(1);
                let mut contributions = self.send_count_contributions.lock();
                let mut pool = self.tokens.lock();
                for _ in 0..token.new_slots_free {
                    let count = contributions.entry(token.rank).or_insert(0);
                    *count += 1;
                    if *count >= senders {
                        *count = 0;
                        pool.ingest(token.rank, 1);
                    }
                }
            }
            _ => {
                self.tokens.lock().ingest(token.rank, token.new_slots_free);
            }
        }
    }

    pub fn tokens_available(&self) -> usize {
        self.tokens.lock().total()
    }

    /// Run one table-building cycle: snapshot tokens, invoke the policy,
    /// update the adaptive interval, and advance the sequence counter by
    /// however many entries were emitted.
    pub fn build_cycle(&self) -> Cycle {
        let mut pool = self.tokens.lock();
        let available = pool.total();
        let mut batch = pool.drain();
        drop(pool);

        let next_seq = self.next_sequence_id.load(Ordering::Acquire);
        let entries = self.policy.lock().apply(&mut batch, next_seq);
        let consumed = available.saturating_sub(batch.total());

        self.tokens.lock().restore(batch);

        if let Some((last, _)) = entries.last() {
            self.next_sequence_id.store(last + 1, Ordering::Release);
        }

        let mut interval = self.interval.lock();
        interval.observe(available, consumed);
        let interval_ms = interval.current_ms();

        Cycle { entries, mode: self.mode(), interval_ms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PolicyConfig, RouterMode};

    fn config(policy: PolicyConfig) -> RouterConfig {
        RouterConfig {
            receivers: vec![1, 2, 3, 4],
            senders: vec![1],
            mode: RouterMode::RouteBySequenceID,
            policy,
            partition: 0,
            token_port: 35555,
            table_port: 35556,
            ack_port: 35557,
            max_table_update_interval_ms: 1000,
            max_ack_cycle_count: 5,
        }
    }

    #[test]
    fn sequence_ids_advance_monotonically_across_cycles() {
        let router = Router::new(config(PolicyConfig::NoOp));
        router.ingest_token(RoutingToken::new(1, 2));
        let first = router.build_cycle();
        assert_eq!(first.entries, vec![(0, 1), (1, 1)]);

        router.ingest_token(RoutingToken::new(2, 1));
        let second = router.build_cycle();
        assert_eq!(second.entries, vec![(2, 2)]);
    }

    #[test]
    fn round_robin_scenario_across_four_receivers() {
        let router = Router::new(config(PolicyConfig::RoundRobin { minimum_participants: 4 }));
        for rank in 1..=4 {
            router.ingest_token(RoutingToken::new(rank, 1));
        }
        let cycle = router.build_cycle();
        assert_eq!(cycle.entries, vec![(0, 1), (1, 2), (2, 3), (3, 4)]);
    }

    #[test]
    fn route_by_send_count_gates_a_ranks_slot_on_every_sender() {
        let mut c = config(PolicyConfig::NoOp);
        c.mode = RouterMode::RouteBySendCount;
        c.senders = vec![10, 11];
        let router = Router::new(c);
        router.ingest_token(RoutingToken::new(1, 1));
        assert_eq!(router.tokens_available(), 0, "only one of two senders has contributed");
        router.ingest_token(RoutingToken::new(1, 1));
        assert_eq!(router.tokens_available(), 1);
    }

    #[test]
    fn empty_pool_produces_empty_cycle() {
        let router = Router::new(config(PolicyConfig::NoOp));
        let cycle = router.build_cycle();
        assert!(cycle.entries.is_empty());
        assert!(cycle.first_sequence_id().is_none());
    }
}
