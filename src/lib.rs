//! Commit log:
//! A segment based, append-only log of binary messages on local disk.
//!
//! ## Features
//!
//! - Messages are framed with a CRC-32, a format version and optional
//!   timestamp, key and value
//! - The log is split into fixed capacity segments; each segment has a dense
//!   on-disk offset index for `O(log n)` reads by offset
//! - Appends and reads are safe to call concurrently from many threads
//! - Segments are recovered on open: a torn tail is truncated and a short
//!   index is rebuilt from the log
//! - Old segments are retired by a cleanup policy
//!
//! ## Example
//!
//! ```rust
//! # use std::sync::Arc;
//! use commit_log::{CommitLog, Config, Message};
//!
//! let temp_dir = tempfile::tempdir().unwrap();
//! let config = Arc::new(Config {
//!     dir: temp_dir.path().to_str().unwrap().to_string(),
//!     max_segment_bytes: Some(1024),
//!     ..Default::default()
//! });
//!
//! let log = CommitLog::open(config).unwrap();
//!
//! // Version 1 message: with a timestamp
//! let msg = Message::from_parts(1, 0, 1_000, Some(b"k"), Some(b"hello"));
//!
//! let offset = log.append(msg.as_bytes()).unwrap();
//! assert_eq!(0, offset);
//!
//! let got = log.read(offset).unwrap();
//! assert_eq!(Some(b"hello".as_slice()), got.value());
//!
//! log.close().unwrap();
//! ```

mod commit_log;
mod config;
mod index;
mod message;
mod segment;

pub(crate) mod num;
pub(crate) mod offset_reader;
pub(crate) mod positional_reader;
#[cfg(test)]
pub(crate) mod testing;

pub use codeq;

pub mod dump_writer;
pub mod errors;

pub use commit_log::commit_log::CommitLog;
pub use commit_log::dump::Dump;
pub use commit_log::read_range::ReadRange;
pub use commit_log::stat::Stat;
pub use config::CleanupPolicy;
pub use config::Config;
pub use config::CLEANED_SUFFIX;
pub use config::INDEX_SUFFIX;
pub use config::LOG_SUFFIX;
pub use index::Index;
pub use index::IndexEntry;
pub use message::Message;
pub use message::MIN_MESSAGE_SIZE;
pub use segment::segment_id::SegmentId;
pub use segment::Segment;
pub use segment::SegmentStat;

#[cfg(test)]
mod tests;
