//! Core Error Types
//!
//! Errors produced while decoding stored frames and index records. These are
//! the "permanent" corruption errors: a storage backend that hits one of
//! them while reading must stop the affected stream rather than skip ahead.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("truncated record: expected {expected} bytes, found {found}")]
    TruncatedRecord { expected: usize, found: usize },

    #[error("stored frame carries offset {found}, expected {expected}")]
    OffsetMismatch { expected: i64, found: i64 },

    #[error("frame length {length} overruns the {available} committed bytes that follow it")]
    FrameOverrun { length: i64, available: i64 },

    #[error("segment header write location {write_location} lies outside the {file_size}-byte file")]
    InvalidSegmentHeader { write_location: i64, file_size: i64 },
}
