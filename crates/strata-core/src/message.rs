//! Message Data Structure
//!
//! This module defines the `Message` type - the unit of data flowing through
//! a Strata topic.
//!
//! ## Structure
//!
//! Each message contains:
//! - **offset**: Dense, monotonically increasing ID within a topic. Assigned
//!   by the topic runner when the append is processed; a producer submits
//!   messages with the offset unassigned (`-1`) and the value it carries on
//!   ingress is ignored.
//! - **payload**: The actual data (arbitrary bytes). Strata never inspects
//!   it.
//!
//! ## Design Decisions
//!
//! - Uses `bytes::Bytes` for the payload so cloning a message (snapshots,
//!   fan-out to multiple subscribers) is reference counted, not copied.
//! - Offset is `i64` rather than `u64` because `-1` is a meaningful sentinel
//!   throughout the system (unassigned / empty log / tail subscription).

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A single entry in a topic's commit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Offset of this message within its topic.
    pub offset: i64,

    /// Opaque payload bytes.
    pub payload: Bytes,
}

impl Message {
    pub fn new(offset: i64, payload: impl Into<Bytes>) -> Self {
        Self {
            offset,
            payload: payload.into(),
        }
    }

    /// A message as it arrives from a producer, before the topic runner has
    /// assigned it an offset.
    pub fn unassigned(payload: impl Into<Bytes>) -> Self {
        Self::new(-1, payload)
    }

    /// Bytes this message occupies in the data file, frame header included.
    pub fn frame_size(&self) -> usize {
        crate::frame::FRAME_HEADER_SIZE + self.payload.len()
    }
}
