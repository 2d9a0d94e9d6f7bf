// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Consumer process supervision. A `Builder` does not manage consumer
//! processes directly; it reports disconnects to whatever implementation
//! of [`ConsumerSupervisor`] the host wires in.

/// Implemented by a host process that owns the lifecycle of consumer
/// tasks (threads, subprocesses, or something else entirely). A `Builder`
/// calls [`ConsumerSupervisor::on_consumer_disconnected`] when a
/// previously-registered consumer stops reading from the broadcast ring.
pub trait ConsumerSupervisor: Send + Sync {
    /// A consumer identified by `rank` stopped responding. Returning
    /// `true` tells the builder a replacement has been started and it may
    /// resume broadcasting to that rank; `false` means give up on it.
    fn on_consumer_disconnected(&self, rank: i32) -> bool;
}

/// A supervisor that never restarts anything; useful for roles run
/// without an external process manager.
pub struct NoRestartSupervisor;

impl ConsumerSupervisor for NoRestartSupervisor {
    fn on_consumer_disconnected(&self, _rank: i32) -> bool {
        false
    }
}
