// SPDX-License-Identifier: Apache-2.0 OR MIT

use daq_proto::ProtoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReqProtoError {
    #[error("malformed request datagram: {0}")]
    Proto(#[from] ProtoError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
