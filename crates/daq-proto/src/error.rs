// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Decode errors shared by every wire type in this crate.

use thiserror::Error;

/// Failure to decode a wire message.
///
/// This never represents a transport failure (that's `daq-transport`'s
/// concern) — only "the bytes I was handed are not a valid message".
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    #[error("buffer too short: need at least {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    #[error("magic mismatch: expected {expected:#010x}, got {got:#010x}")]
    BadMagic { expected: u32, got: u32 },

    #[error("unknown fragment type byte {0:#04x}")]
    UnknownFragmentType(u8),

    #[error("unknown routing mode byte {0:#04x}")]
    UnknownRoutingMode(u8),

    #[error("unknown request mode byte {0:#04x}")]
    UnknownRequestMode(u8),

    #[error("entry count {0} exceeds maximum datagram capacity")]
    TooManyEntries(usize),
}
