// SPDX-License-Identifier: Apache-2.0 OR MIT

use daq_proto::ProtoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire format error: {0}")]
    Proto(#[from] ProtoError),

    #[error("config error: {0}")]
    Config(String),

    #[error("unknown destination rank {0} in configured receivers")]
    UnknownReceiver(i32),
}
