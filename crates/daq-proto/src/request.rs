// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Request protocol wire format: a `RequestHeader` followed by zero or
//! more `RequestPacket`s, sent as a single UDP multicast datagram.

use crate::error::ProtoError;

/// `"HEDR"` as a little-endian u32.
pub const REQUEST_HEADER_MAGIC: u32 = 0x4845_4452;
/// `"TRIG"` as a little-endian u32.
pub const REQUEST_PACKET_MAGIC: u32 = 0x5452_4947;
/// Maximum encoded datagram size a single request message may occupy.
pub const MAX_REQUEST_MESSAGE_BYTES: usize = 65000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RequestMessageMode {
    #[default]
    Normal = 0,
    EndOfRun = 1,
}

impl RequestMessageMode {
    fn from_u8(b: u8) -> Result<Self, ProtoError> {
        match b {
            0 => Ok(RequestMessageMode::Normal),
            1 => Ok(RequestMessageMode::EndOfRun),
            other => Err(ProtoError::UnknownRequestMode(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub magic: u32,
    pub packet_count: u32,
    pub rank: i32,
    pub mode: RequestMessageMode,
}

impl RequestHeader {
    pub const WIRE_SIZE: usize = 4 + 4 + 4 + 1 + 3;

    pub fn new(rank: i32, packet_count: u32, mode: RequestMessageMode) -> Self {
        Self {
            magic: REQUEST_HEADER_MAGIC,
            packet_count,
            rank,
            mode,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == REQUEST_HEADER_MAGIC
    }

    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..8].copy_from_slice(&self.packet_count.to_le_bytes());
        out[8..12].copy_from_slice(&self.rank.to_le_bytes());
        out[12] = self.mode as u8;
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
        if magic != REQUEST_HEADER_MAGIC {
            return Err(ProtoError::BadMagic {
                expected: REQUEST_HEADER_MAGIC,
                got: magic,
            });
        }
        Ok(Self {
            magic,
            packet_count: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            rank: i32::from_le_bytes(buf[8..12].try_into().unwrap()),
            mode: RequestMessageMode::from_u8(buf[12])?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPacket {
    pub magic: u32,
    pub sequence_id: u64,
    pub timestamp: u64,
}

impl RequestPacket {
    pub const WIRE_SIZE: usize = 4 + 4 + 8 + 8;

    pub fn new(sequence_id: u64, timestamp: u64) -> Self {
        Self {
            magic: REQUEST_PACKET_MAGIC,
            sequence_id,
            timestamp,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == REQUEST_PACKET_MAGIC
    }

    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[8..16].copy_from_slice(&self.sequence_id.to_le_bytes());
        out[16..24].copy_from_slice(&self.timestamp.to_le_bytes());
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
        if magic != REQUEST_PACKET_MAGIC {
            return Err(ProtoError::BadMagic {
                expected: REQUEST_PACKET_MAGIC,
                got: magic,
            });
        }
        Ok(Self {
            magic,
            sequence_id: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            timestamp: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
        })
    }
}

/// Builder for an outgoing request datagram: a header plus accumulated
/// packets, serialized as one contiguous byte buffer.
#[derive(Debug, Clone, Default)]
pub struct RequestMessage {
    rank: i32,
    mode: RequestMessageMode,
    packets: Vec<RequestPacket>,
}

impl RequestMessage {
    pub fn new(rank: i32) -> Self {
        Self {
            rank,
            mode: RequestMessageMode::Normal,
            packets: Vec::new(),
        }
    }

    pub fn set_mode(&mut self, mode: RequestMessageMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> RequestMessageMode {
        self.mode
    }

    pub fn add_request(&mut self, sequence_id: u64, timestamp: u64) {
        self.packets.push(RequestPacket::new(sequence_id, timestamp));
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn clear(&mut self) {
        self.packets.clear();
    }

    /// Serialize header + packets into a single datagram, erroring if the
    /// result would exceed `MAX_REQUEST_MESSAGE_BYTES`.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtoError> {
        let header = RequestHeader::new(self.rank, self.packets.len() as u32, self.mode);
        let size = RequestHeader::WIRE_SIZE + self.packets.len() * RequestPacket::WIRE_SIZE;
        if size > MAX_REQUEST_MESSAGE_BYTES {
            return Err(ProtoError::TooManyEntries(self.packets.len()));
        }
        let mut out = Vec::with_capacity(size);
        out.extend_from_slice(&header.to_bytes());
        for p in &self.packets {
            out.extend_from_slice(&p.to_bytes());
        }
        Ok(out)
    }

    /// Decode a full datagram back into its header and packets. Accepts
    /// either ordering of header/entries being concatenated, since on the
    /// wire they are always sent together as one buffer by this type
    /// (contrast with `RoutingPacketHeader`, which tolerates independent
    /// datagrams for header and entries).
    pub fn from_bytes(buf: &[u8]) -> Result<(RequestHeader, Vec<RequestPacket>), ProtoError> {
        let header = RequestHeader::from_bytes(buf)?;
        let mut packets = Vec::with_capacity(header.packet_count as usize);
        let mut offset = RequestHeader::WIRE_SIZE;
        for _ in 0..header.packet_count {
            let packet = RequestPacket::from_bytes(&buf[offset..])?;
            packets.push(packet);
            offset += RequestPacket::WIRE_SIZE;
        }
        Ok((header, packets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_round_trips() {
        let mut msg = RequestMessage::new(5);
        msg.add_request(1, 100);
        msg.add_request(2, 200);
        let bytes = msg.to_bytes().unwrap();
        let (header, packets) = RequestMessage::from_bytes(&bytes).unwrap();
        assert_eq!(header.rank, 5);
        assert_eq!(header.packet_count, 2);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].sequence_id, 1);
        assert_eq!(packets[1].timestamp, 200);
    }

    #[test]
    fn end_of_run_mode_round_trips() {
        let mut msg = RequestMessage::new(1);
        msg.set_mode(RequestMessageMode::EndOfRun);
        let bytes = msg.to_bytes().unwrap();
        let (header, _) = RequestMessage::from_bytes(&bytes).unwrap();
        assert_eq!(header.mode, RequestMessageMode::EndOfRun);
    }

    #[test]
    fn packet_magic_validated() {
        let mut bytes = RequestPacket::new(1, 1).to_bytes();
        bytes[0] = 0xAA;
        let err = RequestPacket::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, ProtoError::BadMagic { .. }));
    }
}
