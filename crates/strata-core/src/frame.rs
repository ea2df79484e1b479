//! Binary Frame Codec
//!
//! Fixed-layout little-endian records for the file-backed log. Three record
//! shapes exist, all 16 bytes:
//!
//! - **Segment header** - the first 16 bytes of every mapped file:
//!   `(start_offset, write_location)`. `write_location` is the byte position
//!   past the last complete record; everything before it is valid,
//!   everything after it is preallocated zeroes.
//! - **Frame header** - precedes every payload in the data file:
//!   `(offset, length)`, followed by `length` payload bytes.
//! - **Index record** - one per message in the index file:
//!   `(offset, data_location)`, where `data_location` is the file position
//!   of the message's frame in the data file.
//!
//! Encoding goes through `bytes::BufMut`; decoding reads from a plain byte
//! slice and fails with [`Error::TruncatedRecord`] when the slice is short.

use bytes::BufMut;

use crate::error::{Error, Result};

/// Size of the metadata header at the start of every mapped file.
pub const SEGMENT_HEADER_SIZE: usize = 16;

/// Size of the `(offset, length)` header preceding each payload.
pub const FRAME_HEADER_SIZE: usize = 16;

/// Size of one `(offset, data_location)` index record.
pub const INDEX_RECORD_SIZE: usize = 16;

fn read_i64_le(buf: &[u8], at: usize) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    i64::from_le_bytes(raw)
}

fn check_len(buf: &[u8], expected: usize) -> Result<()> {
    if buf.len() < expected {
        return Err(Error::TruncatedRecord {
            expected,
            found: buf.len(),
        });
    }
    Ok(())
}

/// The 16-byte header at offset 0 of a mapped file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// First logical offset stored in this file.
    pub start_offset: i64,
    /// Byte position just past the last complete record.
    pub write_location: i64,
}

impl SegmentHeader {
    pub fn encode_to(&self, buf: &mut impl BufMut) {
        buf.put_i64_le(self.start_offset);
        buf.put_i64_le(self.write_location);
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len(buf, SEGMENT_HEADER_SIZE)?;
        Ok(Self {
            start_offset: read_i64_le(buf, 0),
            write_location: read_i64_le(buf, 8),
        })
    }
}

/// The `(offset, length)` header written before each payload in the data
/// file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub offset: i64,
    pub length: i64,
}

impl FrameHeader {
    pub fn encode_to(&self, buf: &mut impl BufMut) {
        buf.put_i64_le(self.offset);
        buf.put_i64_le(self.length);
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len(buf, FRAME_HEADER_SIZE)?;
        Ok(Self {
            offset: read_i64_le(buf, 0),
            length: read_i64_le(buf, 8),
        })
    }
}

/// One fixed-size record in the index file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRecord {
    pub offset: i64,
    pub data_location: i64,
}

impl IndexRecord {
    pub fn encode_to(&self, buf: &mut impl BufMut) {
        buf.put_i64_le(self.offset);
        buf.put_i64_le(self.data_location);
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len(buf, INDEX_RECORD_SIZE)?;
        Ok(Self {
            offset: read_i64_le(buf, 0),
            data_location: read_i64_le(buf, 8),
        })
    }
}
