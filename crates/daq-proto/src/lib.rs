// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wire formats for the DAQ event-building fabric.
//!
//! Every type in this crate is a pure, allocation-light encode/decode
//! structure: no sockets, no shared memory, no threads. Transport-level
//! code in `daq-transport` and buffer management in `daq-smem` build on
//! top of these.
//!
//! All multi-byte integers are little-endian. Fragment headers are laid
//! out as a sequence of 64-bit words per the fabric's wire format; routing
//! and request datagrams are flat byte layouts sent over UDP/TCP.

pub mod error;
pub mod fragment;
pub mod request;
pub mod routing;

pub use error::ProtoError;
pub use fragment::{
    EventHeader, Fragment, FragmentHeader, FragmentType, HEADER_BYTES, HEADER_WORDS,
    INVALID_FRAGMENT_ID, INVALID_SEQUENCE_ID, INVALID_TIMESTAMP,
};
pub use request::{
    RequestHeader, RequestMessage, RequestMessageMode, RequestPacket, MAX_REQUEST_MESSAGE_BYTES,
    REQUEST_HEADER_MAGIC, REQUEST_PACKET_MAGIC,
};
pub use routing::{
    RoutingAckPacket, RoutingMode, RoutingPacketEntry, RoutingPacketHeader, RoutingToken,
    ROUTING_MAGIC, TOKEN_MAGIC,
};
