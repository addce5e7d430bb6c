//! The 15-byte application header and its codec.
//!
//! Wire layout, network byte order:
//!
//! | Offset | Size | Field          |
//! |-------:|-----:|----------------|
//! |      0 |    4 | seq            |
//! |      4 |    4 | ack            |
//! |      8 |    2 | checksum       |
//! |     10 |    2 | payload_length |
//! |     12 |    1 | flags          |
//! |     13 |    2 | conn_id        |
//!
//! The checksum covers the header (with the checksum field zeroed)
//! concatenated with the payload. The codec is pure: no I/O, no state.

use std::fmt;
use thiserror::Error;

use crate::checksum;
use crate::constants::{HEADER_SIZE, MAX_PAYLOAD};
use crate::error::TransferError;
use crate::flags::PacketFlags;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: u32,
    pub ack: u32,
    pub flags: PacketFlags,
    pub conn_id: u16,
    pub payload: Vec<u8>,
}

/// One arm per legal flag combination. Derived after decode has validated
/// the flag byte, so dispatch never sees an illegal combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Syn,
    SynAck,
    Data { fin: bool },
    Ack,
    FinAck,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame of {0} bytes is shorter than the {HEADER_SIZE}-byte header")]
    Truncated(usize),

    #[error("payload length field says {declared} but {actual} bytes follow the header")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("checksum mismatch: computed {computed:#06x}, field holds {field:#06x}")]
    ChecksumMismatch { computed: u16, field: u16 },

    #[error("illegal flag combination {0:#04x}")]
    IllegalFlags(u8),
}

impl Packet {
    /// Handshake request; the payload carries the UTF-8 filename.
    pub fn syn(filename: &str, conn_id: u16) -> Self {
        Self {
            seq: 0,
            ack: 0,
            flags: PacketFlags::SYN,
            conn_id,
            payload: filename.as_bytes().to_vec(),
        }
    }

    /// Handshake accept, echoing the client's conn_id.
    pub fn syn_ack(conn_id: u16) -> Self {
        Self { seq: 0, ack: 0, flags: PacketFlags::SYN_ACK, conn_id, payload: Vec::new() }
    }

    /// Data chunk; the terminal chunk carries FIN|DATA.
    pub fn data(seq: u32, payload: Vec<u8>, fin: bool, conn_id: u16) -> Self {
        let flags = if fin { PacketFlags::FIN_DATA } else { PacketFlags::DATA };
        Self { seq, ack: 0, flags, conn_id, payload }
    }

    /// Cumulative acknowledgement: everything strictly below `ack` arrived.
    pub fn ack(ack: u32, conn_id: u16) -> Self {
        Self { seq: 0, ack, flags: PacketFlags::ACK, conn_id, payload: Vec::new() }
    }

    /// Final acknowledgement, ack = fin_seq + 1.
    pub fn fin_ack(ack: u32, conn_id: u16) -> Self {
        Self { seq: 0, ack, flags: PacketFlags::FIN_ACK, conn_id, payload: Vec::new() }
    }

    pub fn kind(&self) -> PacketKind {
        if self.flags == PacketFlags::SYN {
            PacketKind::Syn
        } else if self.flags == PacketFlags::SYN_ACK {
            PacketKind::SynAck
        } else if self.flags == PacketFlags::DATA {
            PacketKind::Data { fin: false }
        } else if self.flags == PacketFlags::FIN_DATA {
            PacketKind::Data { fin: true }
        } else if self.flags == PacketFlags::ACK {
            PacketKind::Ack
        } else if self.flags == PacketFlags::FIN_ACK {
            PacketKind::FinAck
        } else {
            // Packets are only built by the constructors above or by
            // `decode`, both of which admit exactly the six legal sets.
            unreachable!("illegal flags {} on a constructed packet", self.flags)
        }
    }

    fn header_bytes(&self, checksum: u16) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.seq.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.ack.to_be_bytes());
        bytes[8..10].copy_from_slice(&checksum.to_be_bytes());
        bytes[10..12].copy_from_slice(&(self.payload.len() as u16).to_be_bytes());
        bytes[12] = self.flags.bits();
        bytes[13..15].copy_from_slice(&self.conn_id.to_be_bytes());
        bytes
    }

    /// Serialize into header ++ payload with the checksum patched in.
    pub fn encode(&self) -> Result<Vec<u8>, TransferError> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(TransferError::PayloadTooLarge(self.payload.len()));
        }

        let mut frame = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        frame.extend_from_slice(&self.header_bytes(0));
        frame.extend_from_slice(&self.payload);

        let sum = checksum::compute(&frame);
        frame[8..10].copy_from_slice(&sum.to_be_bytes());

        Ok(frame)
    }

    /// Parse and validate a frame. Rejects short frames, length-field
    /// mismatches, checksum failures, and illegal flag combinations.
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        if frame.len() < HEADER_SIZE {
            return Err(DecodeError::Truncated(frame.len()));
        }

        let seq = u32::from_be_bytes(frame[0..4].try_into().unwrap());
        let ack = u32::from_be_bytes(frame[4..8].try_into().unwrap());
        let field = u16::from_be_bytes(frame[8..10].try_into().unwrap());
        let declared = u16::from_be_bytes(frame[10..12].try_into().unwrap()) as usize;
        let flag_bits = frame[12];
        let conn_id = u16::from_be_bytes(frame[13..15].try_into().unwrap());

        let actual = frame.len() - HEADER_SIZE;
        if declared != actual {
            return Err(DecodeError::LengthMismatch { declared, actual });
        }

        // Recompute over the frame with the checksum field zeroed.
        let mut zeroed = frame.to_vec();
        zeroed[8..10].fill(0);
        let computed = checksum::compute(&zeroed);
        if computed != field {
            return Err(DecodeError::ChecksumMismatch { computed, field });
        }

        let flags = PacketFlags::from_bits(flag_bits).ok_or(DecodeError::IllegalFlags(flag_bits))?;
        if !flags.is_legal() {
            return Err(DecodeError::IllegalFlags(flag_bits));
        }

        Ok(Self { seq, ack, flags, conn_id, payload: frame[HEADER_SIZE..].to_vec() })
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] seq={} ack={} conn={} len={}",
            self.flags,
            self.seq,
            self.ack,
            self.conn_id,
            self.payload.len()
        )
    }
}
