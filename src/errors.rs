//! Typed error conditions of the commit log.
//!
//! Public operations return [`io::Error`]. Each condition below is wrapped
//! into an `io::Error` with a dedicated [`io::ErrorKind`], so a caller can
//! tell "does not exist yet" (`NotFound`) from "data is bad" (`InvalidData`)
//! and can `downcast_ref` the inner error for details.

use std::io;

/// The stored CRC of a message does not match the one computed over its
/// bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(thiserror::Error)]
#[error("Checksum mismatch at offset {offset:?}: stored {stored:#010x}, computed {computed:#010x}")]
pub struct ChecksumMismatch {
    /// The logical offset of the message, if known.
    pub offset: Option<u64>,
    pub stored: u32,
    pub computed: u32,
}

impl ChecksumMismatch {
    pub fn new(stored: u32, computed: u32) -> Self {
        Self {
            offset: None,
            stored,
            computed,
        }
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

impl From<ChecksumMismatch> for io::Error {
    fn from(value: ChecksumMismatch) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, value)
    }
}

/// A length field of a message frame is inconsistent with the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(thiserror::Error)]
#[error("Malformed message: {reason}")]
pub struct MalformedMessage {
    pub reason: String,
}

impl MalformedMessage {
    pub fn new(reason: impl ToString) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }
}

impl From<MalformedMessage> for io::Error {
    fn from(value: MalformedMessage) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, value)
    }
}

/// The requested offset is outside `[first, next)` of the log or segment.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(thiserror::Error)]
#[error("Offset {offset} not found, valid range: [{first}, {next})")]
pub struct OffsetOutOfRange {
    pub offset: u64,
    pub first: u64,
    pub next: u64,
}

impl OffsetOutOfRange {
    pub fn new(offset: u64, first: u64, next: u64) -> Self {
        Self {
            offset,
            first,
            next,
        }
    }
}

impl From<OffsetOutOfRange> for io::Error {
    fn from(value: OffsetOutOfRange) -> Self {
        io::Error::new(io::ErrorKind::NotFound, value)
    }
}

/// The index is empty, or the query is below its first entry.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(thiserror::Error)]
#[error("No index entry at or below relative offset {relative_offset}; first entry: {first:?}")]
pub struct IndexEntryNotFound {
    pub relative_offset: u32,
    pub first: Option<u32>,
}

impl IndexEntryNotFound {
    pub fn new(relative_offset: u32, first: Option<u32>) -> Self {
        Self {
            relative_offset,
            first,
        }
    }
}

impl From<IndexEntryNotFound> for io::Error {
    fn from(value: IndexEntryNotFound) -> Self {
        io::Error::new(io::ErrorKind::NotFound, value)
    }
}

/// The commit log has been closed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(thiserror::Error)]
#[error("Commit log is closed: {dir}")]
pub struct LogClosed {
    pub dir: String,
}

impl LogClosed {
    pub fn new(dir: impl ToString) -> Self {
        Self {
            dir: dir.to_string(),
        }
    }
}

impl From<LogClosed> for io::Error {
    fn from(value: LogClosed) -> Self {
        io::Error::new(io::ErrorKind::Other, value)
    }
}

/// The segment has been closed or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(thiserror::Error)]
#[error("Segment is closed: base offset {base_offset}")]
pub struct SegmentClosed {
    pub base_offset: u64,
}

impl SegmentClosed {
    pub fn new(base_offset: u64) -> Self {
        Self { base_offset }
    }
}

impl From<SegmentClosed> for io::Error {
    fn from(value: SegmentClosed) -> Self {
        io::Error::new(io::ErrorKind::Other, value)
    }
}

/// A timestamp is read from a message whose format version has none.
///
/// This is a caller bug, not a data or I/O condition: check
/// [`Message::magic_byte`](crate::Message::magic_byte) before asking for a
/// timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(thiserror::Error)]
#[error("Message with magic byte {magic_byte} has no timestamp")]
pub struct TimestampUnavailable {
    pub magic_byte: i8,
}

impl TimestampUnavailable {
    pub fn new(magic_byte: i8) -> Self {
        Self { magic_byte }
    }
}

/// A file in the log directory does not follow the segment file naming.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(thiserror::Error)]
#[error("Invalid segment file name: '{file_name}': {reason}")]
pub struct InvalidSegmentFileName {
    pub file_name: String,
    pub reason: String,
}

impl InvalidSegmentFileName {
    pub fn new(file_name: impl ToString, reason: impl ToString) -> Self {
        Self {
            file_name: file_name.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<InvalidSegmentFileName> for io::Error {
    fn from(value: InvalidSegmentFileName) -> Self {
        io::Error::new(io::ErrorKind::InvalidInput, value)
    }
}
