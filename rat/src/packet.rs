//! Wire-format definitions for RAT segments.
//!
//! Every datagram exchanged between peers is a [`Segment`]: a fixed 8-byte
//! [`Header`] followed directly by up to [`MAX_PAYLOAD`] payload bytes. This
//! module is responsible for:
//! - Defining the on-wire binary layout.
//! - Validating field values at construction so nothing is ever truncated.
//! - Serialising and deserialising headers, segments and NACK payloads.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Stream ID           |        Sequence Number        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        Payload Length         |     Flags     |    Offset     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! `offset` is always a count: the number of segments in the sender's window
//! round on `SWIN` data segments, the number of listed sequence numbers on
//! `NACK` segments, and zero otherwise.

use crate::error::{RatError, Result};
use crate::flags::{Flag, FlagSet};

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 8;

/// Largest payload a single segment may carry.
pub const MAX_PAYLOAD: usize = 512;

/// Width of one NACK entry in bits.
pub const NACK_WORD_BITS: usize = 16;

// Byte offsets of each field within the serialised header.
const OFF_STREAM: usize = 0;
const OFF_SEQ: usize = 2;
const OFF_LENGTH: usize = 4;
const OFF_FLAGS: usize = 6;
const OFF_OFFSET: usize = 7;

/// Fixed-size protocol header.
///
/// Fields are private so that a `Header` can only exist with values that fit
/// the wire layout; use [`Header::new`] or [`encode`] to build one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    stream_id: u16,
    seq_num: u16,
    length: u16,
    flags: FlagSet,
    offset: u8,
}

impl Header {
    /// Build a header, rejecting any field that does not fit its bit width.
    ///
    /// Integer arguments are taken wide on purpose: the caller's arithmetic
    /// is checked here instead of being silently truncated by an `as` cast.
    pub fn new(stream_id: u32, seq_num: u32, length: u32, flags: FlagSet, offset: u32) -> Result<Self> {
        let stream_id = u16::try_from(stream_id)
            .map_err(|_| RatError::out_of_range("stream_id", stream_id.into(), u16::MAX.into()))?;
        let seq_num = u16::try_from(seq_num)
            .map_err(|_| RatError::out_of_range("seq_num", seq_num.into(), u16::MAX.into()))?;
        if length as usize > MAX_PAYLOAD {
            return Err(RatError::out_of_range("length", length.into(), MAX_PAYLOAD as u64));
        }
        let offset = u8::try_from(offset)
            .map_err(|_| RatError::out_of_range("offset", offset.into(), u8::MAX.into()))?;
        Ok(Self {
            stream_id,
            seq_num,
            length: length as u16,
            flags,
            offset,
        })
    }

    pub fn stream_id(&self) -> u16 {
        self.stream_id
    }

    pub fn seq_num(&self) -> u16 {
        self.seq_num
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn flags(&self) -> FlagSet {
        self.flags
    }

    pub fn offset(&self) -> u8 {
        self.offset
    }

    /// Serialise into exactly [`HEADER_LEN`] bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[OFF_STREAM..OFF_STREAM + 2].copy_from_slice(&self.stream_id.to_be_bytes());
        buf[OFF_SEQ..OFF_SEQ + 2].copy_from_slice(&self.seq_num.to_be_bytes());
        buf[OFF_LENGTH..OFF_LENGTH + 2].copy_from_slice(&self.length.to_be_bytes());
        buf[OFF_FLAGS] = self.flags.bits();
        buf[OFF_OFFSET] = self.offset;
        buf
    }

    /// Parse a header from exactly [`HEADER_LEN`] bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let buf: &[u8; HEADER_LEN] = buf.try_into().map_err(|_| {
            RatError::HeaderMalformed(format!("expected {HEADER_LEN} bytes, got {}", buf.len()))
        })?;

        let length = u16::from_be_bytes([buf[OFF_LENGTH], buf[OFF_LENGTH + 1]]);
        if length as usize > MAX_PAYLOAD {
            return Err(RatError::HeaderMalformed(format!(
                "length field {length} exceeds {MAX_PAYLOAD}"
            )));
        }

        Ok(Self {
            stream_id: u16::from_be_bytes([buf[OFF_STREAM], buf[OFF_STREAM + 1]]),
            seq_num: u16::from_be_bytes([buf[OFF_SEQ], buf[OFF_SEQ + 1]]),
            length,
            flags: FlagSet::from_bits(buf[OFF_FLAGS]),
            offset: buf[OFF_OFFSET],
        })
    }
}

/// Pack the five header fields into their 8-byte wire form.
pub fn encode(stream_id: u32, seq_num: u32, length: u32, flags: FlagSet, offset: u32) -> Result<[u8; HEADER_LEN]> {
    Header::new(stream_id, seq_num, length, flags, offset).map(|h| h.to_bytes())
}

/// Inverse of [`encode`].
pub fn decode(bytes: &[u8]) -> Result<Header> {
    Header::from_bytes(bytes)
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    header: Header,
    payload: Vec<u8>,
}

impl Segment {
    /// A segment with no payload. Control segments (ACK, HLO, BYE, ALI, RST)
    /// are all of this shape.
    pub fn control(stream_id: u16, seq_num: u16, flags: FlagSet) -> Self {
        Self {
            header: Header {
                stream_id,
                seq_num,
                length: 0,
                flags,
                offset: 0,
            },
            payload: Vec::new(),
        }
    }

    /// A segment carrying `payload`; `length` is taken from the payload.
    pub fn with_payload(stream_id: u16, seq_num: u16, flags: FlagSet, offset: u8, payload: Vec<u8>) -> Result<Self> {
        let header = Header::new(
            stream_id.into(),
            seq_num.into(),
            u32::try_from(payload.len()).unwrap_or(u32::MAX),
            flags,
            offset.into(),
        )?;
        Ok(Self { header, payload })
    }

    /// A data segment belonging to a window round of `round_len` segments.
    pub fn data(stream_id: u16, seq_num: u16, round_len: u8, payload: Vec<u8>) -> Result<Self> {
        Self::with_payload(stream_id, seq_num, FlagSet::SWIN, round_len, payload)
    }

    /// A NACK listing `missing`; `cumulative` is the highest contiguous
    /// sequence number received.
    pub fn nack(stream_id: u16, cumulative: u16, missing: &[u16]) -> Result<Self> {
        let count = u8::try_from(missing.len())
            .map_err(|_| RatError::out_of_range("offset", missing.len() as u64, u8::MAX.into()))?;
        let payload = encode_nack(missing)?;
        Self::with_payload(stream_id, cumulative, FlagSet::NACK, count, payload)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn stream_id(&self) -> u16 {
        self.header.stream_id
    }

    pub fn seq_num(&self) -> u16 {
        self.header.seq_num
    }

    pub fn flags(&self) -> FlagSet {
        self.header.flags
    }

    pub fn has(&self, flag: Flag) -> bool {
        self.header.flags.contains(flag)
    }

    /// `true` when the flags are exactly `flags`.
    pub fn is(&self, flags: FlagSet) -> bool {
        self.header.flags == flags
    }

    /// Sequence numbers listed in a NACK payload.
    pub fn nacked(&self) -> Result<Vec<u16>> {
        let seqs = decode_nack(&self.payload)?;
        if seqs.len() != self.header.offset as usize {
            return Err(RatError::HeaderMalformed(format!(
                "NACK offset says {} entries, payload holds {}",
                self.header.offset,
                seqs.len()
            )));
        }
        Ok(seqs)
    }

    /// Serialise header and payload into one datagram.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.header.to_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a datagram, checking that its size agrees with the header.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(RatError::HeaderMalformed(format!(
                "datagram of {} bytes is shorter than a header",
                buf.len()
            )));
        }
        let header = Header::from_bytes(&buf[..HEADER_LEN])?;
        let payload = &buf[HEADER_LEN..];
        if payload.len() != header.length as usize {
            return Err(RatError::HeaderMalformed(format!(
                "length field {} does not match {} payload bytes",
                header.length,
                payload.len()
            )));
        }
        Ok(Self {
            header,
            payload: payload.to_vec(),
        })
    }
}

/// Encode sequence numbers as consecutive zero-padded 16-bit words.
pub fn encode_nack(seqs: &[u16]) -> Result<Vec<u8>> {
    let payload: Vec<u8> = seqs.iter().flat_map(|s| s.to_be_bytes()).collect();
    let bits = payload.len() * 8;
    if bits % NACK_WORD_BITS != 0 {
        return Err(RatError::MisalignedWords { bits });
    }
    if payload.len() > MAX_PAYLOAD {
        return Err(RatError::out_of_range("length", payload.len() as u64, MAX_PAYLOAD as u64));
    }
    Ok(payload)
}

/// Decode a NACK payload back into sequence numbers.
pub fn decode_nack(payload: &[u8]) -> Result<Vec<u16>> {
    let bits = payload.len() * 8;
    if bits % NACK_WORD_BITS != 0 {
        return Err(RatError::MisalignedWords { bits });
    }
    Ok(payload
        .chunks_exact(2)
        .map(|w| u16::from_be_bytes([w[0], w[1]]))
        .collect())
}
