//! Strata Core Types
//!
//! This crate defines the types shared by every other Strata crate: the
//! `Message` that producers append and consumers receive, the binary frame
//! codec used by the file-backed log, and the core error type.
//!
//! ## What is a Message?
//!
//! A message is a single entry in a topic's commit log:
//! - **offset**: dense, zero-based, per-topic identifier assigned by the
//!   broker at append time (never by the producer)
//! - **payload**: the opaque bytes handed over by the producer
//!
//! ## On-disk framing
//!
//! The file backend stores messages in an append-only data file and locates
//! them through an append-only index file. Both files share a 16-byte
//! segment header; the records themselves are fixed little-endian layouts
//! defined in [`frame`].
//!
//! ```text
//! data.bin   = segment header || frame*
//! frame      = offset:i64 LE || length:i64 LE || payload[length]
//! index.bin  = segment header || index record*
//! index rec  = offset:i64 LE || data_location:i64 LE
//! ```
//!
//! ## Design Decisions
//!
//! - Payloads are `bytes::Bytes` so snapshots and streaming never copy the
//!   payload more than once.
//! - Offsets are `i64` with `-1` reserved to mean "unassigned" on the write
//!   path and "empty log" / "tail" on the read path.

pub mod error;
pub mod frame;
pub mod message;

pub use error::{Error, Result};
pub use frame::{FrameHeader, IndexRecord, SegmentHeader};
pub use message::Message;
