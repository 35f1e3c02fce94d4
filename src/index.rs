//! On-disk offset index of a segment.
//!
//! The index file is a sequence of fixed-width big-endian entries:
//!
//! ```text
//! | relative_offset: u32 | position: u32 | ...
//! ```
//!
//! Entry `i` lives at byte `i * 8`, so a lookup binary-searches the file with
//! positional reads and never scans it.

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::FileExt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use byteorder::BigEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;
use codeq::error_context_ext::ErrorContextExt;
use codeq::Decode;
use codeq::Encode;
use log::warn;

use crate::errors::IndexEntryNotFound;

/// Size in bytes of one encoded [`IndexEntry`].
pub const ENTRY_SIZE: u64 = 8;

/// Maps a message's offset relative to its segment to its byte position in
/// the segment's log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub relative_offset: u32,
    pub position: u32,
}

impl IndexEntry {
    pub fn new(relative_offset: u32, position: u32) -> Self {
        Self {
            relative_offset,
            position,
        }
    }
}

impl codeq::Encode for IndexEntry {
    fn encode<W: io::Write>(&self, mut w: W) -> Result<usize, io::Error> {
        w.write_u32::<BigEndian>(self.relative_offset)?;
        w.write_u32::<BigEndian>(self.position)?;
        Ok(ENTRY_SIZE as usize)
    }
}

impl codeq::Decode for IndexEntry {
    fn decode<R: io::Read>(mut r: R) -> Result<Self, io::Error> {
        let relative_offset = r.read_u32::<BigEndian>()?;
        let position = r.read_u32::<BigEndian>()?;
        Ok(Self {
            relative_offset,
            position,
        })
    }
}

/// A file of [`IndexEntry`] in strictly increasing relative offset order.
///
/// Lookups may run concurrently with each other and with `append()`. Calls to
/// `append()` must be serialized by the caller.
#[derive(Debug)]
pub struct Index {
    path: String,
    f: File,

    /// Number of entries visible to lookups.
    entries: AtomicU64,

    /// Relative offset of the last entry plus one, `0` if empty.
    next_relative: AtomicU64,
}

impl Index {
    /// Opens or creates the index file at `path`.
    ///
    /// A partially written trailing entry is discarded.
    pub fn open(path: impl ToString) -> Result<Self, io::Error> {
        let path = path.to_string();

        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .context(|| format!("open index {}", path))?;

        let file_size = f.metadata()?.len();
        let entries = file_size / ENTRY_SIZE;

        if file_size % ENTRY_SIZE != 0 {
            warn!(
                "Index {} has a partial trailing entry, truncate from {} to {}",
                path,
                file_size,
                entries * ENTRY_SIZE
            );
            f.set_len(entries * ENTRY_SIZE)?;
        }

        let index = Self {
            path,
            f,
            entries: AtomicU64::new(entries),
            next_relative: AtomicU64::new(0),
        };

        index.reload_last()?;

        Ok(index)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Number of entries in the index.
    pub fn len(&self) -> u64 {
        self.entries.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends an entry.
    ///
    /// The log bytes at `position` must already be written: an entry is never
    /// visible before the message it points to.
    pub fn append(
        &self,
        relative_offset: u32,
        position: u32,
    ) -> Result<(), io::Error> {
        let next_relative = self.next_relative.load(Ordering::Acquire);
        if (relative_offset as u64) < next_relative {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "index entry must be strictly increasing: last {}, attempted {}; in {}",
                    next_relative - 1,
                    relative_offset,
                    self.path
                ),
            ));
        }

        let n = self.len();

        let mut buf = Vec::with_capacity(ENTRY_SIZE as usize);
        IndexEntry::new(relative_offset, position).encode(&mut buf)?;

        self.f
            .write_all_at(&buf, n * ENTRY_SIZE)
            .context(|| format!("append entry {} to {}", n, self.path))?;

        self.next_relative
            .store(relative_offset as u64 + 1, Ordering::Release);
        self.entries.store(n + 1, Ordering::Release);

        Ok(())
    }

    /// Returns the `i`-th entry.
    pub fn entry_at(&self, i: u64) -> Result<IndexEntry, io::Error> {
        let n = self.len();
        if i >= n {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("entry {} is beyond {} entries in {}", i, n, self.path),
            ));
        }

        let mut buf = [0u8; ENTRY_SIZE as usize];
        self.f
            .read_exact_at(&mut buf, i * ENTRY_SIZE)
            .context(|| format!("read entry {} from {}", i, self.path))?;

        IndexEntry::decode(&buf[..])
    }

    pub fn last_entry(&self) -> Result<Option<IndexEntry>, io::Error> {
        let n = self.len();
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.entry_at(n - 1)?))
    }

    /// Finds the entry with the greatest relative offset `<=`
    /// `relative_offset`.
    ///
    /// Returns the position it points to and whether its relative offset is
    /// exactly the one asked for. An empty index, or a query below the first
    /// entry, is a `NotFound` error carrying [`IndexEntryNotFound`].
    pub fn lookup(
        &self,
        relative_offset: u32,
    ) -> Result<(u32, bool), io::Error> {
        let found = self.find(relative_offset)?;
        Ok((found.position, found.relative_offset == relative_offset))
    }

    /// Like [`Index::lookup`] but returns the whole entry found.
    pub fn find(&self, relative_offset: u32) -> Result<IndexEntry, io::Error> {
        let n = self.len();
        if n == 0 {
            return Err(IndexEntryNotFound::new(relative_offset, None).into());
        }

        let first = self.entry_at(0)?;
        if relative_offset < first.relative_offset {
            return Err(IndexEntryNotFound::new(
                relative_offset,
                Some(first.relative_offset),
            )
            .into());
        }

        // Invariant: entry(lo).relative_offset <= relative_offset,
        // entry(hi) is beyond it or does not exist.
        let mut lo = 0;
        let mut found = first;
        let mut hi = n;

        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            let entry = self.entry_at(mid)?;

            if entry.relative_offset <= relative_offset {
                lo = mid;
                found = entry;
            } else {
                hi = mid;
            }
        }

        Ok(found)
    }

    /// Keeps only the first `entries` entries.
    pub fn truncate(&self, entries: u64) -> Result<(), io::Error> {
        self.f.set_len(entries * ENTRY_SIZE).context(|| {
            format!("truncate {} to {} entries", self.path, entries)
        })?;
        self.entries.store(entries, Ordering::Release);
        self.reload_last()
    }

    pub fn sync(&self) -> Result<(), io::Error> {
        self.f.sync_data()
    }

    /// Flushes the entries to disk and releases the file.
    pub fn close(self) -> Result<(), io::Error> {
        self.sync().context(|| format!("sync {} on close", self.path))
    }

    fn reload_last(&self) -> Result<(), io::Error> {
        let next = match self.last_entry()? {
            Some(last) => last.relative_offset as u64 + 1,
            None => 0,
        };
        self.next_relative.store(next, Ordering::Release);
        Ok(())
    }
}
