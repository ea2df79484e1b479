//! Mapped Segment File
//!
//! A single append-only file whose reads are served through a memory map and
//! whose writes go through positional I/O on the file handle. The file
//! backend keeps two of these per topic: `data.bin` (framed payloads) and
//! `index.bin` (fixed 16-byte records).
//!
//! ## File Layout
//!
//! ```text
//! offset 0           16                              write_location      size
//! ┌──────────────────┬───────────────────────────────┬──────────────────┐
//! │ segment header   │ complete records              │ preallocated     │
//! │ (start_offset,   │                               │ zeroes           │
//! │  write_location) │                               │                  │
//! └──────────────────┴───────────────────────────────┴──────────────────┘
//! ```
//!
//! The header is rewritten in place after every append, so on reopen the
//! stored `write_location` tells us exactly where the valid region ends.
//! The header is trusted as-is; the durability ordering in
//! [`FileDatastore::flush`](crate::FileDatastore) (data before index)
//! guarantees a recovered index never points past valid data.
//!
//! ## Growth
//!
//! The file is grown in fixed 10 MiB steps via `set_len`, which keeps
//! appends cheap (no per-record metadata updates beyond the header) and
//! keeps the mapping valid between growths. Growing takes the exclusive
//! side of the file's reader-writer lock because the mapping must be
//! replaced; readers hold the shared side while they dereference it.
//!
//! ## Concurrency
//!
//! One writer (the topic runner) and many readers (subscribers). Positional
//! writes need no lock of their own because the runner serializes them; the
//! `write_location` is an atomic so readers can test for end-of-log without
//! touching the lock at all.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use bytes::{Bytes, BytesMut};
use memmap2::Mmap;
use parking_lot::RwLock;
use strata_core::frame::{
    FrameHeader, IndexRecord, SegmentHeader, FRAME_HEADER_SIZE, INDEX_RECORD_SIZE,
    SEGMENT_HEADER_SIZE,
};
use strata_core::Message;
use tracing::debug;

use crate::error::Result;

/// The file grows by this much every time it runs out of room.
pub const GROWTH_CHUNK: i64 = 10 * 1024 * 1024;

const HEADER: i64 = SEGMENT_HEADER_SIZE as i64;
const FRAME: i64 = FRAME_HEADER_SIZE as i64;
const RECORD: i64 = INDEX_RECORD_SIZE as i64;

struct MapState {
    file: File,
    map: Mmap,
    size: i64,
}

/// An append-only file with mmap reads and positional writes.
pub struct MappedFile {
    path: PathBuf,
    start_offset: i64,
    write_location: AtomicI64,
    state: RwLock<MapState>,
}

impl MappedFile {
    /// Open the file at `path`, creating it (with an initial header of
    /// `(0, 16)` and one growth chunk of preallocated space) if it does not
    /// exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut size = file.metadata()?.len() as i64;
        let fresh = size == 0;
        if fresh {
            file.set_len(GROWTH_CHUNK as u64)?;
            size = GROWTH_CHUNK;
        }

        let map = unsafe { Mmap::map(&file)? };

        let (start_offset, write_location) = if fresh {
            (0, HEADER)
        } else {
            let header_end = SEGMENT_HEADER_SIZE.min(size as usize);
            let header = SegmentHeader::decode(&map[..header_end])?;
            (header.start_offset, header.write_location)
        };
        if write_location < HEADER || write_location > size {
            return Err(strata_core::Error::InvalidSegmentHeader {
                write_location,
                file_size: size,
            }
            .into());
        }

        let mapped = Self {
            path,
            start_offset,
            write_location: AtomicI64::new(write_location),
            state: RwLock::new(MapState { file, map, size }),
        };
        if fresh {
            mapped.write_header()?;
        }
        Ok(mapped)
    }

    /// Byte position just past the last complete record.
    pub fn write_location(&self) -> i64 {
        self.write_location.load(Ordering::SeqCst)
    }

    /// First logical offset stored in this file.
    pub fn start_offset(&self) -> i64 {
        self.start_offset
    }

    /// Append a framed message and return the location the frame starts at.
    pub fn append_message(&self, message: &Message) -> Result<i64> {
        let needed = FRAME + message.payload.len() as i64;
        self.ensure_available(needed)?;

        let location = self.write_location.load(Ordering::SeqCst);
        {
            let state = self.state.read();
            let mut header = BytesMut::with_capacity(FRAME_HEADER_SIZE);
            FrameHeader {
                offset: message.offset,
                length: message.payload.len() as i64,
            }
            .encode_to(&mut header);
            state.file.write_all_at(&header, location as u64)?;
            state
                .file
                .write_all_at(&message.payload, (location + FRAME) as u64)?;
        }
        self.write_location.store(location + needed, Ordering::SeqCst);
        self.write_header()?;
        Ok(location)
    }

    /// Append one `(offset, data_location)` index record.
    pub fn append_index(&self, offset: i64, data_location: i64) -> Result<()> {
        self.ensure_available(RECORD)?;

        let location = self.write_location.load(Ordering::SeqCst);
        {
            let state = self.state.read();
            let mut record = BytesMut::with_capacity(INDEX_RECORD_SIZE);
            IndexRecord {
                offset,
                data_location,
            }
            .encode_to(&mut record);
            state.file.write_all_at(&record, location as u64)?;
        }
        self.write_location.store(location + RECORD, Ordering::SeqCst);
        self.write_header()
    }

    /// Read the framed message starting at `location`.
    pub fn read_message_at(&self, location: i64) -> Result<Message> {
        let state = self.state.read();
        let committed = self.write_location.load(Ordering::SeqCst);

        let frame_end = location + FRAME;
        if location < HEADER || frame_end > committed {
            return Err(strata_core::Error::TruncatedRecord {
                expected: FRAME_HEADER_SIZE,
                found: (committed - location).max(0) as usize,
            }
            .into());
        }
        let header = FrameHeader::decode(&state.map[location as usize..frame_end as usize])?;
        if header.length < 0 || header.length > committed - frame_end {
            return Err(strata_core::Error::FrameOverrun {
                length: header.length,
                available: committed - frame_end,
            }
            .into());
        }
        let payload =
            &state.map[frame_end as usize..(frame_end + header.length) as usize];
        Ok(Message::new(header.offset, Bytes::copy_from_slice(payload)))
    }

    /// Look up the data-file location recorded for `logical_offset`, or
    /// `None` at end-of-log. The end-of-log test reads the atomic
    /// `write_location`, so a caught-up reader never takes the lock.
    pub fn read_file_offset(&self, logical_offset: i64) -> Result<Option<i64>> {
        let relative = logical_offset - self.start_offset;
        if relative < 0 {
            return Ok(None);
        }
        let location = HEADER + relative * RECORD;
        if location > self.write_location.load(Ordering::SeqCst) - RECORD {
            return Ok(None);
        }
        let state = self.state.read();
        let record =
            IndexRecord::decode(&state.map[location as usize..(location + RECORD) as usize])?;
        Ok(Some(record.data_location))
    }

    /// Offset field of the last index record, or `-1` if the file holds
    /// only the header.
    pub fn read_last_offset(&self) -> Result<i64> {
        let location = self.write_location.load(Ordering::SeqCst) - RECORD;
        if location < HEADER {
            return Ok(-1);
        }
        let state = self.state.read();
        let record =
            IndexRecord::decode(&state.map[location as usize..(location + RECORD) as usize])?;
        Ok(record.offset)
    }

    /// Number of complete index records in the file.
    pub fn num_records(&self) -> i64 {
        (self.write_location.load(Ordering::SeqCst) - HEADER) / RECORD
    }

    /// Flush outstanding writes to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.state.read().file.sync_all()?;
        Ok(())
    }

    fn write_header(&self) -> Result<()> {
        let header = SegmentHeader {
            start_offset: self.start_offset,
            write_location: self.write_location.load(Ordering::SeqCst),
        };
        let mut buf = BytesMut::with_capacity(SEGMENT_HEADER_SIZE);
        header.encode_to(&mut buf);
        let state = self.state.read();
        state.file.write_all_at(&buf, 0)?;
        Ok(())
    }

    /// Grow the file (and replace the mapping) until at least `needed`
    /// bytes are free past `write_location`. Idempotent; takes the
    /// exclusive lock only when growth is actually required.
    fn ensure_available(&self, needed: i64) -> Result<()> {
        let location = self.write_location.load(Ordering::SeqCst);
        {
            let state = self.state.read();
            if state.size - location >= needed {
                return Ok(());
            }
        }

        let mut state = self.state.write();
        if state.size - location >= needed {
            return Ok(());
        }
        let mut new_size = state.size;
        while new_size - location < needed {
            new_size += GROWTH_CHUNK;
        }
        state.file.set_len(new_size as u64)?;
        state.map = unsafe { Mmap::map(&state.file)? };
        state.size = new_size;
        debug!(path = %self.path.display(), new_size, "grew mapped file");
        Ok(())
    }
}
