// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Process roles and run control for the event-building fabric: the
//! [`commander`] state machine every role exposes to an external
//! run-control system, and the [`role`] types (`Reader`, `Builder`,
//! `Consumer`) that wire the transport, shared-memory, and request-protocol
//! crates into something a binary can run.

pub mod commander;
pub mod config;
pub mod error;
pub mod role;
pub mod shutdown;
pub mod supervisor;

pub use commander::{Commander, CommanderState, Report, ReportKind};
pub use config::{BuilderConfig, ConsumerConfig, ReaderConfig, RequestModeConfig};
pub use error::CoreError;
pub use role::{Builder, Consumer, Reader};
pub use shutdown::install_sigint_handler;
pub use supervisor::{ConsumerSupervisor, NoRestartSupervisor};
