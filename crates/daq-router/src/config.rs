// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Router configuration: ports, the configured receiver set, and the
//! assignment policy.

use daq_proto::RoutingMode;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::RouterError;

fn default_token_port() -> u16 {
    35555
}
fn default_table_port() -> u16 {
    35556
}
fn default_ack_port() -> u16 {
    35557
}
fn default_max_table_update_interval_ms() -> u64 {
    1000
}
fn default_max_ack_cycle_count() -> u32 {
    5
}

/// Which assignment policy the router runs each table-building cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind")]
pub enum PolicyConfig {
    NoOp,
    RoundRobin {
        /// Negative values mean `|receivers| + minimum_participants`,
        /// floored at 1.
        minimum_participants: i32,
    },
    CapacityTest {
        percent: u32,
    },
    NthEvent {
        n: u64,
        target: i32,
    },
}

/// Which quantity readers use to look up their next destination. Mirrors
/// `daq_proto::RoutingMode` but is the serializable, config-facing form
/// (excludes the wire-only `Invalid` sentinel).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RouterMode {
    RouteBySequenceID,
    RouteBySendCount,
}

impl From<RouterMode> for RoutingMode {
    fn from(mode: RouterMode) -> Self {
        match mode {
            RouterMode::RouteBySequenceID => RoutingMode::RouteBySequenceID,
            RouterMode::RouteBySendCount => RoutingMode::RouteBySendCount,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Ranks this router assigns sequences to.
    pub receivers: Vec<i32>,

    /// Ranks this router expects acks and tokens from.
    pub senders: Vec<i32>,

    pub mode: RouterMode,

    pub policy: PolicyConfig,

    /// Partition number (0-127); namespaces the default ports so several
    /// systems can share a host.
    #[serde(default)]
    pub partition: u8,

    #[serde(default = "default_token_port")]
    pub token_port: u16,

    #[serde(default = "default_table_port")]
    pub table_port: u16,

    #[serde(default = "default_ack_port")]
    pub ack_port: u16,

    #[serde(default = "default_max_table_update_interval_ms")]
    pub max_table_update_interval_ms: u64,

    #[serde(default = "default_max_ack_cycle_count")]
    pub max_ack_cycle_count: u32,
}

impl RouterConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RouterError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| RouterError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RouterError> {
        if self.receivers.is_empty() {
            return Err(RouterError::Config("no receivers configured".into()));
        }
        if let PolicyConfig::NthEvent { target, .. } = &self.policy {
            if !self.receivers.contains(target) {
                return Err(RouterError::UnknownReceiver(*target));
            }
        }
        Ok(())
    }

    /// Partition-adjusted port, matching the host's convention of
    /// namespacing the default ports by partition number.
    pub fn effective_port(&self, base: u16) -> u16 {
        base.wrapping_add(self.partition as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_receivers() {
        let config = RouterConfig {
            receivers: vec![],
            senders: vec![1],
            mode: RouterMode::RouteBySequenceID,
            policy: PolicyConfig::NoOp,
            partition: 0,
            token_port: default_token_port(),
            table_port: default_table_port(),
            ack_port: default_ack_port(),
            max_table_update_interval_ms: default_max_table_update_interval_ms(),
            max_ack_cycle_count: default_max_ack_cycle_count(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_nth_event_target_outside_receivers() {
        let config = RouterConfig {
            receivers: vec![1, 2],
            senders: vec![1],
            mode: RouterMode::RouteBySequenceID,
            policy: PolicyConfig::NthEvent { n: 3, target: 9 },
            partition: 0,
            token_port: default_token_port(),
            table_port: default_table_port(),
            ack_port: default_ack_port(),
            max_table_update_interval_ms: default_max_table_update_interval_ms(),
            max_ack_cycle_count: default_max_ack_cycle_count(),
        };
        assert!(matches!(config.validate(), Err(RouterError::UnknownReceiver(9))));
    }

    #[test]
    fn effective_port_adds_partition() {
        let mut config = RouterConfig {
            receivers: vec![1],
            senders: vec![1],
            mode: RouterMode::RouteBySequenceID,
            policy: PolicyConfig::NoOp,
            partition: 3,
            token_port: default_token_port(),
            table_port: default_table_port(),
            ack_port: default_ack_port(),
            max_table_update_interval_ms: default_max_table_update_interval_ms(),
            max_ack_cycle_count: default_max_ack_cycle_count(),
        };
        assert_eq!(config.effective_port(35555), 35558);
        config.partition = 0;
        assert_eq!(config.effective_port(35555), 35555);
    }
}
