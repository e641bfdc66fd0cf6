//! Wire-format definitions for protocol units.
//!
//! Every datagram exchanged between peers is a [`Packet`]: a fixed 12-byte
//! [`Header`] followed by raw payload bytes.  This module is responsible for:
//! - Defining the on-wire binary layout.
//! - Serialising a [`Header`] / [`Packet`] into bytes ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], returning
//!   [`PacketError`] for truncated input or unknown type codes.
//! - Computing the XOR-fold payload [`checksum`].
//!
//! No I/O happens here.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Type      |      Seq      |        Length (hi 16)         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        Length (lo 16)         |      Timestamp (hi 16)        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      Timestamp (lo 16)        |           Checksum            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 12 bytes.
//! type(1) + seq(1) + length(4) + timestamp(4) + checksum(2)

use std::time::{SystemTime, UNIX_EPOCH};

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 12;

// Byte offsets of each field within the serialised header.
const OFF_TYPE: usize = 0;
const OFF_SEQ: usize = 1;
const OFF_LENGTH: usize = 2;
const OFF_TIMESTAMP: usize = 6;
const OFF_CHECKSUM: usize = 10;

/// Unit type carried in the first header byte.
///
/// The teardown request and its acknowledgment share [`PacketType::Fin`];
/// which one a FIN is depends on who sent it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Syn = 0x01,
    SynAck = 0x02,
    Data = 0x03,
    Ack = 0x04,
    Fin = 0x05,
}

impl PacketType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PacketType {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Syn),
            0x02 => Ok(Self::SynAck),
            0x03 => Ok(Self::Data),
            0x04 => Ok(Self::Ack),
            0x05 => Ok(Self::Fin),
            other => Err(PacketError::UnknownType(other)),
        }
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Syn => "SYN",
            Self::SynAck => "SYN-ACK",
            Self::Data => "DATA",
            Self::Ack => "ACK",
            Self::Fin => "FIN",
        };
        f.write_str(name)
    }
}

/// Fixed-size protocol header.
///
/// Fields are in host byte order; [`Header::encode`] converts to big-endian
/// on the wire and [`Header::decode`] converts back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: PacketType,
    /// Sequence number modulo 256.
    pub seq: u8,
    /// Declared payload length.  Informational only; never validated
    /// against the datagram size.
    pub length: u32,
    /// Sender clock in milliseconds since the epoch, modulo 2^32.
    pub timestamp: u32,
    /// XOR-fold of the payload bytes; `0` on control units.
    pub checksum: u16,
}

impl Header {
    /// Header for a control unit (SYN, SYN-ACK, ACK, FIN): zero length and
    /// zero checksum.
    pub fn control(kind: PacketType, seq: u8, timestamp: u32) -> Self {
        Self {
            kind,
            seq,
            length: 0,
            timestamp,
            checksum: 0,
        }
    }

    /// Serialise into exactly [`HEADER_LEN`] bytes.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[OFF_TYPE] = self.kind.as_u8();
        buf[OFF_SEQ] = self.seq;
        buf[OFF_LENGTH..OFF_LENGTH + 4].copy_from_slice(&self.length.to_be_bytes());
        buf[OFF_TIMESTAMP..OFF_TIMESTAMP + 4].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&self.checksum.to_be_bytes());
        buf
    }

    /// Parse the first [`HEADER_LEN`] bytes of `buf`.
    ///
    /// Trailing bytes are ignored.  Returns [`PacketError::TooShort`] when
    /// fewer than [`HEADER_LEN`] bytes are supplied and
    /// [`PacketError::UnknownType`] for an unrecognised type code.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::TooShort { len: buf.len() });
        }

        let kind = PacketType::try_from(buf[OFF_TYPE])?;
        let seq = buf[OFF_SEQ];
        let length = u32::from_be_bytes([
            buf[OFF_LENGTH],
            buf[OFF_LENGTH + 1],
            buf[OFF_LENGTH + 2],
            buf[OFF_LENGTH + 3],
        ]);
        let timestamp = u32::from_be_bytes([
            buf[OFF_TIMESTAMP],
            buf[OFF_TIMESTAMP + 1],
            buf[OFF_TIMESTAMP + 2],
            buf[OFF_TIMESTAMP + 3],
        ]);
        let checksum = u16::from_be_bytes([buf[OFF_CHECKSUM], buf[OFF_CHECKSUM + 1]]);

        Ok(Self {
            kind,
            seq,
            length,
            timestamp,
            checksum,
        })
    }
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a control unit with the current timestamp.
    pub fn control(kind: PacketType, seq: u8) -> Self {
        Self {
            header: Header::control(kind, seq, timestamp_now()),
            payload: Vec::new(),
        }
    }

    /// Build a DATA unit.  `length` and `checksum` are derived from
    /// `payload`.
    pub fn data(seq: u8, payload: Vec<u8>, timestamp: u32) -> Self {
        Self {
            header: Header {
                kind: PacketType::Data,
                seq,
                length: payload.len() as u32,
                timestamp,
                checksum: checksum(&payload),
            },
            payload,
        }
    }

    /// Total size on the wire (header + payload).
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// `true` when the stored checksum matches the payload.
    pub fn checksum_ok(&self) -> bool {
        checksum(&self.payload) == self.header.checksum
    }

    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// Header fields are written as stored; nothing is recomputed, so an
    /// intentionally wrong checksum survives encoding.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a [`Packet`] from a raw datagram.
    ///
    /// The payload is everything after the header, regardless of the
    /// header's `length` field.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        let header = Header::decode(buf)?;
        Ok(Self {
            header,
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    /// Fewer than [`HEADER_LEN`] bytes.
    #[error("malformed header: {len} bytes, need {HEADER_LEN}")]
    TooShort { len: usize },
    #[error("unknown packet type 0x{0:02x}")]
    UnknownType(u8),
}

/// XOR-fold every payload byte into a 16-bit accumulator.
///
/// Order-independent and not collision resistant.
pub fn checksum(payload: &[u8]) -> u16 {
    payload.iter().fold(0u16, |acc, &b| acc ^ u16::from(b))
}

/// A checksum guaranteed to differ from `checksum`.
///
/// Used by the sender to realise a simulated loss as a corrupted unit.
pub fn corrupt_checksum(checksum: u16) -> u16 {
    checksum ^ u16::from(b'\'')
}

/// Milliseconds since the Unix epoch, wrapped to 32 bits.
pub fn timestamp_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0)
}
