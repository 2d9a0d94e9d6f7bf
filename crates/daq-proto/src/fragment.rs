// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fragment header, fragment type tags, and the event envelope that groups
//! fragments sharing a sequence id inside an SMEM buffer.
//!
//! # Wire layout
//!
//! ```text
//! word[0] = word_count             (total size of the fragment, in 64-bit words)
//! word[1] = sequence_id
//! word[2] = timestamp
//! word[3] = fragment_id            (effective 16 bits, rest reserved)
//! word[4] = metadata_word_count << 8 | type
//! word[5..5+metadata_word_count]   = metadata
//! word[5+metadata_word_count..word_count] = payload
//! ```

use crate::error::ProtoError;

/// Number of 64-bit words occupied by a `FragmentHeader` on the wire.
pub const HEADER_WORDS: usize = 5;
/// Size in bytes of a serialized `FragmentHeader`.
pub const HEADER_BYTES: usize = HEADER_WORDS * 8;

/// Reserved sentinel for an unassigned sequence id.
pub const INVALID_SEQUENCE_ID: u64 = u64::MAX;
/// Reserved sentinel for an unassigned timestamp.
pub const INVALID_TIMESTAMP: u64 = u64::MAX;
/// Reserved sentinel for an unassigned fragment id.
pub const INVALID_FRAGMENT_ID: u16 = u16::MAX;

/// Distinguishes user payload fragments from control-plane fragments.
///
/// Encoded as a single byte on the wire; ordering here is purely for
/// readability and carries no wire significance (the discriminant is
/// fixed explicitly).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FragmentType {
    Data = 0,
    Init = 1,
    EndOfData = 2,
    EndOfRun = 3,
    EndOfSubrun = 4,
    Shutdown = 5,
    Empty = 6,
    Container = 7,
    Error = 8,
    /// Sentinel for an unassigned or not-yet-classified fragment type.
    Invalid = 0xFF,
}

impl FragmentType {
    pub const fn is_system(self) -> bool {
        matches!(
            self,
            FragmentType::Init
                | FragmentType::EndOfData
                | FragmentType::EndOfRun
                | FragmentType::EndOfSubrun
                | FragmentType::Shutdown
        )
    }

    fn from_u8(b: u8) -> Result<Self, ProtoError> {
        Ok(match b {
            0 => FragmentType::Data,
            1 => FragmentType::Init,
            2 => FragmentType::EndOfData,
            3 => FragmentType::EndOfRun,
            4 => FragmentType::EndOfSubrun,
            5 => FragmentType::Shutdown,
            6 => FragmentType::Empty,
            7 => FragmentType::Container,
            8 => FragmentType::Error,
            0xFF => FragmentType::Invalid,
            other => return Err(ProtoError::UnknownFragmentType(other)),
        })
    }
}

/// The fixed-size, bit-exact fragment header.
///
/// `word_count` includes the header itself, so a header-only fragment
/// (no metadata, no payload) has `word_count == HEADER_WORDS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub word_count: u64,
    pub sequence_id: u64,
    pub timestamp: u64,
    pub fragment_id: u16,
    pub fragment_type: FragmentType,
    pub metadata_word_count: u32,
}

impl FragmentHeader {
    /// A header with all sentinel (invalid) values, as used for scratch
    /// slots and drop-area placeholders.
    pub fn invalid() -> Self {
        Self {
            word_count: HEADER_WORDS as u64,
            sequence_id: INVALID_SEQUENCE_ID,
            timestamp: INVALID_TIMESTAMP,
            fragment_id: INVALID_FRAGMENT_ID,
            fragment_type: FragmentType::Invalid,
            metadata_word_count: 0,
        }
    }

    /// Payload size in bytes implied by `word_count`, `metadata_word_count`
    /// and the fixed header size.
    pub fn payload_words(&self) -> u64 {
        self.word_count
            .saturating_sub(HEADER_WORDS as u64)
            .saturating_sub(self.metadata_word_count as u64)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_BYTES] {
        let mut out = [0u8; HEADER_BYTES];
        out[0..8].copy_from_slice(&self.word_count.to_le_bytes());
        out[8..16].copy_from_slice(&self.sequence_id.to_le_bytes());
        out[16..24].copy_from_slice(&self.timestamp.to_le_bytes());
        out[24..32].copy_from_slice(&(self.fragment_id as u64).to_le_bytes());
        let packed = ((self.metadata_word_count as u64) << 8) | self.fragment_type as u64;
        out[32..40].copy_from_slice(&packed.to_le_bytes());
        out
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, ProtoError> {
        if buf.len() < HEADER_BYTES {
            return Err(ProtoError::Truncated {
                need: HEADER_BYTES,
                got: buf.len(),
            });
        }
        let word_count = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let sequence_id = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        let timestamp = u64::from_le_bytes(buf[16..24].try_into().unwrap());
        let fragment_id = u64::from_le_bytes(buf[24..32].try_into().unwrap()) as u16;
        let packed = u64::from_le_bytes(buf[32..40].try_into().unwrap());
        let fragment_type = FragmentType::from_u8((packed & 0xFF) as u8)?;
        let metadata_word_count = (packed >> 8) as u32;
        Ok(Self {
            word_count,
            sequence_id,
            timestamp,
            fragment_id,
            fragment_type,
            metadata_word_count,
        })
    }

    /// Mark this header as carrying an error payload, preserving all other
    /// fields so alignment downstream is unaffected.
    pub fn mark_error(&mut self) {
        self.fragment_type = FragmentType::Error;
    }
}

/// A fully materialized fragment: header plus its metadata and payload
/// bytes (each a flat `Vec<u8>` of the appropriate word-aligned length).
#[derive(Debug, Clone)]
pub struct Fragment {
    pub header: FragmentHeader,
    pub metadata: Vec<u8>,
    pub payload: Vec<u8>,
}

impl Fragment {
    pub fn new(
        sequence_id: u64,
        fragment_id: u16,
        timestamp: u64,
        fragment_type: FragmentType,
        metadata: Vec<u8>,
        payload: Vec<u8>,
    ) -> Self {
        let metadata_word_count = ((metadata.len() + 7) / 8) as u32;
        let payload_words = ((payload.len() + 7) / 8) as u64;
        let word_count = HEADER_WORDS as u64 + metadata_word_count as u64 + payload_words;
        Self {
            header: FragmentHeader {
                word_count,
                sequence_id,
                timestamp,
                fragment_id,
                fragment_type,
                metadata_word_count,
            },
            metadata,
            payload,
        }
    }

    /// Construct an `EndOfData` system fragment whose payload carries the
    /// sender's total fragment count.
    pub fn end_of_data(sender_rank: i32, fragment_id: u16, total_sent: u64) -> Self {
        Fragment::new(
            INVALID_SEQUENCE_ID,
            fragment_id,
            INVALID_TIMESTAMP,
            FragmentType::EndOfData,
            Vec::new(),
            total_sent.to_le_bytes().to_vec(),
        )
        .with_sender(sender_rank)
    }

    /// `EndOfRun`/`EndOfSubrun` fragments carry one word: the sender rank.
    pub fn end_of_run(fragment_type: FragmentType, sender_rank: i32, sequence_id: u64) -> Self {
        debug_assert!(matches!(
            fragment_type,
            FragmentType::EndOfRun | FragmentType::EndOfSubrun
        ));
        Fragment::new(
            sequence_id,
            INVALID_FRAGMENT_ID,
            INVALID_TIMESTAMP,
            fragment_type,
            Vec::new(),
            (sender_rank as i64).to_le_bytes().to_vec(),
        )
    }

    pub fn empty(sequence_id: u64, timestamp: u64, fragment_id: u16) -> Self {
        Fragment::new(
            sequence_id,
            fragment_id,
            timestamp,
            FragmentType::Empty,
            Vec::new(),
            Vec::new(),
        )
    }

    /// Stash the sender's rank as the first 4 bytes of metadata, mirroring
    /// how control fragments tag their origin without a dedicated field.
    fn with_sender(mut self, sender_rank: i32) -> Self {
        let mut meta = sender_rank.to_le_bytes().to_vec();
        meta.append(&mut self.metadata);
        let metadata_word_count = ((meta.len() + 7) / 8) as u32;
        self.header.word_count = self.header.word_count - self.header.metadata_word_count as u64
            + metadata_word_count as u64;
        self.header.metadata_word_count = metadata_word_count;
        self.metadata = meta;
        self
    }

    pub fn sender_rank(&self) -> Option<i32> {
        if self.metadata.len() >= 4 {
            Some(i32::from_le_bytes(self.metadata[0..4].try_into().unwrap()))
        } else {
            None
        }
    }

    /// Decode the single-word payload carried by `EndOfData`.
    pub fn end_of_data_count(&self) -> Option<u64> {
        if self.header.fragment_type == FragmentType::EndOfData && self.payload.len() >= 8 {
            Some(u64::from_le_bytes(self.payload[0..8].try_into().unwrap()))
        } else {
            None
        }
    }
}

/// The event envelope written at the start of every SMEM buffer,
/// immediately followed by the buffer's fragments in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    pub run_id: u32,
    pub subrun_id: u32,
    pub sequence_id: u64,
    pub event_id: u64,
    pub is_complete: bool,
}

impl EventHeader {
    pub fn new(run_id: u32, subrun_id: u32, sequence_id: u64, event_id: u64) -> Self {
        Self {
            run_id,
            subrun_id,
            sequence_id,
            event_id,
            is_complete: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_through_bytes() {
        let h = FragmentHeader {
            word_count: 12,
            sequence_id: 42,
            timestamp: 7,
            fragment_id: 3,
            fragment_type: FragmentType::Data,
            metadata_word_count: 1,
        };
        let bytes = h.to_bytes();
        let back = FragmentHeader::from_bytes(&bytes).unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn truncated_header_is_rejected() {
        let err = FragmentHeader::from_bytes(&[0u8; 10]).unwrap_err();
        assert_eq!(
            err,
            ProtoError::Truncated {
                need: HEADER_BYTES,
                got: 10
            }
        );
    }

    #[test]
    fn mark_error_preserves_other_fields() {
        let mut h = FragmentHeader {
            word_count: 9,
            sequence_id: 1,
            timestamp: 2,
            fragment_id: 1,
            fragment_type: FragmentType::Data,
            metadata_word_count: 0,
        };
        let before = h;
        h.mark_error();
        assert_eq!(h.fragment_type, FragmentType::Error);
        assert_eq!(h.sequence_id, before.sequence_id);
        assert_eq!(h.word_count, before.word_count);
    }

    #[test]
    fn end_of_data_carries_total_count() {
        let f = Fragment::end_of_data(3, INVALID_FRAGMENT_ID, 100);
        assert_eq!(f.header.fragment_type, FragmentType::EndOfData);
        assert_eq!(f.end_of_data_count(), Some(100));
        assert_eq!(f.sender_rank(), Some(3));
    }

    #[test]
    fn system_fragment_type_classification() {
        assert!(FragmentType::Init.is_system());
        assert!(FragmentType::EndOfData.is_system());
        assert!(!FragmentType::Data.is_system());
        assert!(!FragmentType::Container.is_system());
    }
}
