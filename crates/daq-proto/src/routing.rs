// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Routing table, routing ack, and routing token wire formats.

use crate::error::ProtoError;

/// Magic bytes identifying a `RoutingPacketHeader` on the wire.
pub const ROUTING_MAGIC: u32 = 0x1337_beef;
/// Magic bytes identifying a `RoutingToken` on the wire.
pub const TOKEN_MAGIC: u32 = 0xbeef_cafe;

/// Which quantity a receiver uses to look up its next routing destination.
///
/// `Invalid` is the default/unconfigured state of a router before a mode
/// is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RoutingMode {
    RouteBySequenceID = 0,
    RouteBySendCount = 1,
    #[default]
    Invalid = 0xFF,
}

impl RoutingMode {
    fn from_u8(b: u8) -> Result<Self, ProtoError> {
        match b {
            0 => Ok(RoutingMode::RouteBySequenceID),
            1 => Ok(RoutingMode::RouteBySendCount),
            0xFF => Ok(RoutingMode::Invalid),
            other => Err(ProtoError::UnknownRoutingMode(other)),
        }
    }
}

/// A single `(sequence_id -> destination_rank)` assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingPacketEntry {
    pub sequence_id: u64,
    pub destination_rank: i32,
}

impl RoutingPacketEntry {
    pub const WIRE_SIZE: usize = 8 + 4;

    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0..8].copy_from_slice(&self.sequence_id.to_le_bytes());
        out[8..12].copy_from_slice(&self.destination_rank.to_le_bytes());
        out
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, ProtoError> {
        if buf.len() < Self::WIRE_SIZE {
            return Err(ProtoError::Truncated {
                need: Self::WIRE_SIZE,
                got: buf.len(),
            });
        }
        Ok(Self {
            sequence_id: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            destination_rank: i32::from_le_bytes(buf[8..12].try_into().unwrap()),
        })
    }
}

/// The header sent immediately before a batch of `RoutingPacketEntry`
/// values over UDP multicast. The header and the entries are sent as two
/// successive datagrams; receivers tolerate either arrival order, so this
/// type carries no length-prefix coupling to the entry bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingPacketHeader {
    pub magic: u32,
    pub mode: RoutingMode,
    pub n_entries: u64,
}

impl RoutingPacketHeader {
    pub const WIRE_SIZE: usize = 4 + 1 + 3 + 8;

    pub fn new(mode: RoutingMode, n_entries: usize) -> Self {
        Self {
            magic: ROUTING_MAGIC,
            mode,
            n_entries: n_entries as u64,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == ROUTING_MAGIC
    }

    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4] = self.mode as u8;
        out[8..16].copy_from_slice(&self.n_entries.to_le_bytes());
        out
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, ProtoError> {
        if buf.len() < Self::WIRE_SIZE {
            return Err(ProtoError::Truncated {
                need: Self::WIRE_SIZE,
                got: buf.len(),
            });
        }
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != ROUTING_MAGIC {
            return Err(ProtoError::BadMagic {
                expected: ROUTING_MAGIC,
                got: magic,
            });
        }
        let mode = RoutingMode::from_u8(buf[4])?;
        let n_entries = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        Ok(Self {
            magic,
            mode,
            n_entries,
        })
    }
}

/// Unicast acknowledgment sent back to the router for a received table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingAckPacket {
    pub rank: i32,
    pub first_sequence_id: u64,
    pub last_sequence_id: u64,
}

impl RoutingAckPacket {
    pub const WIRE_SIZE: usize = 4 + 8 + 8;

    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0..4].copy_from_slice(&self.rank.to_le_bytes());
        out[4..12].copy_from_slice(&self.first_sequence_id.to_le_bytes());
        out[12..20].copy_from_slice(&self.last_sequence_id.to_le_bytes());
        out
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, ProtoError> {
        if buf.len() < Self::WIRE_SIZE {
            return Err(ProtoError::Truncated {
                need: Self::WIRE_SIZE,
                got: buf.len(),
            });
        }
        Ok(Self {
            rank: i32::from_le_bytes(buf[0..4].try_into().unwrap()),
            first_sequence_id: u64::from_le_bytes(buf[4..12].try_into().unwrap()),
            last_sequence_id: u64::from_le_bytes(buf[12..20].try_into().unwrap()),
        })
    }
}

/// Credit message sent by a builder over its TCP connection to the router
/// whenever an SMEM buffer transitions to `Empty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingToken {
    pub magic: u32,
    pub rank: i32,
    pub new_slots_free: u32,
}

impl RoutingToken {
    pub const WIRE_SIZE: usize = 4 + 4 + 4;

    pub fn new(rank: i32, new_slots_free: u32) -> Self {
        Self {
            magic: TOKEN_MAGIC,
            rank,
            new_slots_free,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == TOKEN_MAGIC
    }

    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..8].copy_from_slice(&self.rank.to_le_bytes());
        out[8..12].copy_from_slice(&self.new_slots_free.to_le_bytes());
        out
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, ProtoError> {
        if buf.len() < Self::WIRE_SIZE {
            return Err(ProtoError::Truncated {
                need: Self::WIRE_SIZE,
                got: buf.len(),
            });
        }
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != TOKEN_MAGIC {
            return Err(ProtoError::BadMagic {
                expected: TOKEN_MAGIC,
                got: magic,
            });
        }
        Ok(Self {
            magic,
            rank: i32::from_le_bytes(buf[4..8].try_into().unwrap()),
            new_slots_free: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_header_round_trip() {
        let h = RoutingPacketHeader::new(RoutingMode::RouteBySequenceID, 3);
        let back = RoutingPacketHeader::from_bytes(&h.to_bytes()).unwrap();
        assert_eq!(h, back);
        assert!(back.is_valid());
    }

    #[test]
    fn routing_header_rejects_bad_magic() {
        let mut bytes = RoutingPacketHeader::new(RoutingMode::RouteBySendCount, 1).to_bytes();
        bytes[0] = 0;
        let err = RoutingPacketHeader::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, ProtoError::BadMagic { .. }));
    }

    #[test]
    fn entry_round_trip() {
        let e = RoutingPacketEntry {
            sequence_id: 99,
            destination_rank: -1,
        };
        assert_eq!(RoutingPacketEntry::from_bytes(&e.to_bytes()).unwrap(), e);
    }

    #[test]
    fn token_round_trip_and_validation() {
        let t = RoutingToken::new(4, 1);
        assert!(t.is_valid());
        let back = RoutingToken::from_bytes(&t.to_bytes()).unwrap();
        assert_eq!(t, back);
    }

    #[test]
    fn ack_round_trip() {
        let a = RoutingAckPacket {
            rank: 2,
            first_sequence_id: 10,
            last_sequence_id: 20,
        };
        assert_eq!(RoutingAckPacket::from_bytes(&a.to_bytes()).unwrap(), a);
    }
}
