// SPDX-License-Identifier: Apache-2.0 OR MIT

use daq_proto::ProtoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire decode error: {0}")]
    Proto(#[from] ProtoError),

    #[error("no route for sequence id {0}")]
    NoRoute(u64),

    #[error("send timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("destination rank {0} is not connected")]
    NotConnected(i32),
}
