// SPDX-License-Identifier: Apache-2.0 OR MIT

use daq_reqproto::ReqProtoError;
use daq_smem::SmemError;
use daq_transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("shared memory error: {0}")]
    Smem(#[from] SmemError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("request protocol error: {0}")]
    ReqProto(#[from] ReqProtoError),

    #[error("illegal transition: {command} while in state {state}")]
    IllegalTransition { command: &'static str, state: &'static str },
}
