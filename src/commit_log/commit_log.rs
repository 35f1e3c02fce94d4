use std::fs;
use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::RwLock;

use codeq::error_context_ext::ErrorContextExt;
use log::debug;
use log::error;
use log::info;
use log::warn;

use crate::commit_log::dump::Dump;
use crate::commit_log::read_range::ReadRange;
use crate::commit_log::stat::Stat;
use crate::config::CLEANED_SUFFIX;
use crate::config::INDEX_SUFFIX;
use crate::config::LOG_SUFFIX;
use crate::errors::LogClosed;
use crate::errors::OffsetOutOfRange;
use crate::errors::SegmentClosed;
use crate::num::format_pad_u64;
use crate::CleanupPolicy;
use crate::Config;
use crate::Message;
use crate::Segment;
use crate::SegmentId;

/// An append-only log of messages, split into segments on disk.
///
/// All operations take `&self` and are safe to call from multiple threads.
/// Appends are serialized per segment; reads never wait for an append.
#[derive(Debug)]
pub struct CommitLog {
    config: Arc<Config>,

    /// Segments in strictly increasing base offset order. The last one is
    /// the active segment that receives appends. Never empty.
    ///
    /// The write lock is only taken to roll over or to detach retired
    /// segments.
    segments: RwLock<Vec<Arc<Segment>>>,

    closed: AtomicBool,
}

impl CommitLog {
    /// Get a reference to the CommitLog configuration.
    pub fn config(&self) -> &Config {
        self.config.as_ref()
    }

    /// Opens a CommitLog at the directory in `config`, creating it if
    /// needed.
    ///
    /// This operation:
    /// 1. Removes `.cleaned` files left by an interrupted compaction
    /// 2. Opens existing segments in base offset order, recovering each
    /// 3. Creates an empty segment at offset 0 if there is none
    ///
    /// # Errors
    /// Returns an error if:
    /// - Directory operations fail
    /// - A segment can not be recovered
    /// - There are gaps between segment offsets
    pub fn open(config: Arc<Config>) -> Result<Self, io::Error> {
        fs::create_dir_all(&config.dir)
            .context(|| format!("create dir '{}'", config.dir))?;

        Self::remove_cleaned_files(&config)?;

        let segment_ids = Self::load_segment_ids(&config)?;

        let mut segments = Vec::with_capacity(segment_ids.len() + 1);
        let mut prev_end_offset = None;

        for segment_id in segment_ids {
            Self::ensure_consecutive_segments(prev_end_offset, segment_id)?;

            let segment = Segment::open(config.clone(), segment_id.0)
                .context(|| format!("open CommitLog in '{}'", config.dir))?;

            prev_end_offset = Some(segment.next_offset());
            segments.push(Arc::new(segment));
        }

        if segments.is_empty() {
            segments.push(Arc::new(Segment::open(config.clone(), 0)?));
        }

        info!(
            "Opened CommitLog in '{}': segments: {}, next_offset: {}",
            config.dir,
            segments.len(),
            prev_end_offset.unwrap_or_default()
        );

        Ok(Self {
            config,
            segments: RwLock::new(segments),
            closed: AtomicBool::new(false),
        })
    }

    /// Verifies that a segment starts where the previous one ends.
    ///
    /// A gap would indicate data loss or corruption.
    fn ensure_consecutive_segments(
        prev_end_offset: Option<u64>,
        segment_id: SegmentId,
    ) -> Result<(), io::Error> {
        let Some(prev_end) = prev_end_offset else {
            return Ok(());
        };

        if prev_end != segment_id.base_offset() {
            let message = format!(
                "Gap between segments: {} -> {}; Can not open, \
                        fix this error and re-open",
                format_pad_u64(prev_end),
                format_pad_u64(segment_id.base_offset()),
            );
            return Err(io::Error::new(io::ErrorKind::InvalidData, message));
        }

        Ok(())
    }

    /// Lists the segments in `config.dir`, sorted by base offset.
    ///
    /// Files that are neither a segment log nor an index are ignored with a
    /// warning.
    pub fn load_segment_ids(
        config: &Config,
    ) -> Result<Vec<SegmentId>, io::Error> {
        let path = &config.dir;
        let entries = fs::read_dir(path)
            .context(|| format!("list segments in '{}'", path))?;

        let mut segment_ids = vec![];
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();

            let fn_str = file_name.to_string_lossy();
            if fn_str.ends_with(INDEX_SUFFIX) {
                continue;
            }

            let res = Config::parse_segment_file_name(&fn_str, LOG_SUFFIX);

            match res {
                Ok(offset) => {
                    segment_ids.push(SegmentId(offset));
                }
                Err(err) => {
                    warn!("Ignore invalid segment file name: '{}': {}", fn_str, err);
                    continue;
                }
            };
        }

        segment_ids.sort();

        Ok(segment_ids)
    }

    /// A `.cleaned` file is a compacted segment that was never swapped in;
    /// the original segment is still intact.
    fn remove_cleaned_files(config: &Config) -> Result<(), io::Error> {
        for entry in fs::read_dir(&config.dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let fn_str = file_name.to_string_lossy();

            if !fn_str.ends_with(CLEANED_SUFFIX) {
                continue;
            }

            warn!("Remove stale cleaned file: '{}'", fn_str);
            fs::remove_file(entry.path())
                .context(|| format!("remove '{}'", fn_str))?;
        }
        Ok(())
    }

    /// Appends one encoded message frame and returns its offset.
    ///
    /// The frame layout is validated and its CRC is recomputed: whatever CRC
    /// the caller wrote is overwritten.
    pub fn append(&self, frame: &[u8]) -> Result<u64, io::Error> {
        let mut msg = Message::parse(frame.to_vec())?;
        msg.stamp_crc();

        self.append_frame(msg.as_bytes())
    }

    /// Appends a message built by the caller, see [`CommitLog::append`].
    pub fn append_message(&self, msg: &Message) -> Result<u64, io::Error> {
        self.append(msg.as_bytes())
    }

    fn append_frame(&self, frame: &[u8]) -> Result<u64, io::Error> {
        self.append_frame_to(self.active_segment(), frame)
    }

    /// Appends to `active`, moving on to the current active segment
    /// whenever `active` is full or retired.
    fn append_frame_to(
        &self,
        mut active: Arc<Segment>,
        frame: &[u8],
    ) -> Result<u64, io::Error> {
        loop {
            self.ensure_open()?;

            let res = match active.append(frame) {
                Ok(res) => res,
                Err(_) if self.is_closed() => {
                    return Err(LogClosed::new(&self.config.dir).into());
                }
                // Retired by `clean()` after a roll over.
                Err(e) if is_segment_closed(&e) => {
                    debug!("{} is retired, retry append", active.segment_id());
                    active = self.active_segment();
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Some(offset) = res {
                return Ok(offset);
            }

            self.roll_over(&active)?;
            active = self.active_segment();
        }
    }

    /// Starts a new active segment after `full`.
    ///
    /// Concurrent appenders may all find `full` full; only the first one
    /// creates the new segment, the others retry on it.
    fn roll_over(&self, full: &Arc<Segment>) -> Result<(), io::Error> {
        let mut segments = self.segments.write().unwrap();

        let last = segments.last().unwrap();
        if !Arc::ptr_eq(last, full) {
            return Ok(());
        }

        self.ensure_open()?;

        let base_offset = full.next_offset();
        let segment = Segment::open(self.config.clone(), base_offset)
            .context(|| format!("roll over from {}", full.segment_id()))?;

        info!(
            "Roll over from {} (size: {}) to {}",
            full.segment_id(),
            full.position(),
            segment.segment_id()
        );

        segments.push(Arc::new(segment));
        Ok(())
    }

    /// Reads the message at `offset`.
    ///
    /// Returns a `NotFound` error carrying [`OffsetOutOfRange`] if the
    /// offset is not in `[first_offset, next_offset)`.
    pub fn read(&self, offset: u64) -> Result<Message, io::Error> {
        self.ensure_open()?;

        let segment = {
            let segments = self.segments.read().unwrap();

            let first = segments[0].base_offset();
            let next = segments[segments.len() - 1].next_offset();

            if offset < first || offset >= next {
                return Err(OffsetOutOfRange::new(offset, first, next).into());
            }

            let i = segments.partition_point(|s| s.base_offset() <= offset);
            segments[i - 1].clone()
        };

        segment
            .read_message(offset)
            .map_err(|e| self.retired_to_out_of_range(offset, e))
    }

    /// Converts the error of reading a segment that `clean()` has just
    /// retired into the error the read would get now.
    fn retired_to_out_of_range(&self, offset: u64, e: io::Error) -> io::Error {
        if !is_segment_closed(&e) {
            return e;
        }

        if self.is_closed() {
            return LogClosed::new(&self.config.dir).into();
        }

        let first = self.first_offset();
        let next = self.next_offset();
        OffsetOutOfRange::new(offset, first, next).into()
    }

    /// Iterates messages with offsets in `[from, to)`, clamped to the range
    /// the log holds.
    ///
    /// Messages appended after this call are included if they are below
    /// `to`.
    pub fn read_range(
        &self,
        from: u64,
        to: u64,
    ) -> Result<ReadRange<'_>, io::Error> {
        self.ensure_open()?;

        let from = from.max(self.first_offset());
        let to = to.min(self.next_offset());

        Ok(ReadRange::new(self, from, to))
    }

    /// Applies the configured [`CleanupPolicy`] and returns the ids of the
    /// segments retired.
    ///
    /// The active segment is never retired.
    pub fn clean(&self) -> Result<Vec<SegmentId>, io::Error> {
        self.ensure_open()?;

        let retired = match self.config.cleanup_policy() {
            CleanupPolicy::Delete => self.detach_oldest_segments(),
            CleanupPolicy::Compact => {
                debug!(
                    "Cleanup policy is {}, nothing to retire in '{}'",
                    CleanupPolicy::Compact,
                    self.config.dir
                );
                vec![]
            }
        };

        // Files are deleted without holding the segment list lock.
        let mut first_err = None;
        for segment in retired.iter() {
            if let Err(e) = segment.remove() {
                error!("Failed to remove {}: {}", segment.segment_id(), e);
                first_err.get_or_insert(e);
            }
        }

        if let Some(e) = first_err {
            return Err(e);
        }

        let ids = retired.iter().map(|s| s.segment_id()).collect::<Vec<_>>();

        if !ids.is_empty() {
            info!(
                "Retired {} segments in '{}', first offset is now {}",
                ids.len(),
                self.config.dir,
                self.first_offset()
            );
        }

        Ok(ids)
    }

    /// Detaches the oldest segments while the log is larger than
    /// `max_log_bytes`, keeping at least the active one.
    fn detach_oldest_segments(&self) -> Vec<Arc<Segment>> {
        let max_log_bytes = self.config.max_log_bytes();

        let mut segments = self.segments.write().unwrap();

        let mut total = segments.iter().map(|s| s.on_disk_size()).sum::<u64>();
        let mut n = 0;

        while total > max_log_bytes && segments.len() - n > 1 {
            total -= segments[n].on_disk_size();
            n += 1;
        }

        segments.drain(..n).collect()
    }

    /// Offset of the first message still in the log.
    pub fn first_offset(&self) -> u64 {
        let segments = self.segments.read().unwrap();
        segments[0].base_offset()
    }

    /// Offset the next appended message will get.
    pub fn next_offset(&self) -> u64 {
        self.active_segment().next_offset()
    }

    pub fn segment_ids(&self) -> Vec<SegmentId> {
        let segments = self.segments.read().unwrap();
        segments.iter().map(|s| s.segment_id()).collect()
    }

    /// Returns the current size of the log on disk in bytes, log and index
    /// files of every segment included.
    pub fn on_disk_size(&self) -> u64 {
        let segments = self.segments.read().unwrap();
        segments.iter().map(|s| s.on_disk_size()).sum()
    }

    /// Get statistics about every segment of the log.
    pub fn stat(&self) -> Stat {
        let segments = self.segments.read().unwrap();

        let (active, closed) = segments.split_last().unwrap();

        Stat {
            closed_segments: closed.iter().map(|s| s.stat()).collect(),
            active_segment: active.stat(),
            on_disk_size: segments.iter().map(|s| s.on_disk_size()).sum(),
        }
    }

    /// Returns a dump of the log directory.
    pub fn dump(&self) -> Dump {
        Dump::new(self.config.clone())
    }

    /// Flushes every segment to disk.
    pub fn sync(&self) -> Result<(), io::Error> {
        self.ensure_open()?;

        let segments = self.segments.read().unwrap();
        for segment in segments.iter() {
            segment.sync()?;
        }
        Ok(())
    }

    /// Closes every segment. Every later operation fails with
    /// [`LogClosed`].
    ///
    /// All segments are closed even if some fail, the first error is
    /// returned.
    pub fn close(&self) -> Result<(), io::Error> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(LogClosed::new(&self.config.dir).into());
        }

        let segments = self.segments.read().unwrap();

        let mut first_err = None;
        for segment in segments.iter() {
            if let Err(e) = segment.close() {
                error!("Failed to close {}: {}", segment.segment_id(), e);
                first_err.get_or_insert(e);
            }
        }

        info!("Closed CommitLog in '{}'", self.config.dir);

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn segments(&self) -> Vec<Arc<Segment>> {
        self.segments.read().unwrap().clone()
    }

    fn active_segment(&self) -> Arc<Segment> {
        let segments = self.segments.read().unwrap();
        segments[segments.len() - 1].clone()
    }

    fn ensure_open(&self) -> Result<(), io::Error> {
        if self.is_closed() {
            return Err(LogClosed::new(&self.config.dir).into());
        }
        Ok(())
    }
}

fn is_segment_closed(e: &io::Error) -> bool {
    e.get_ref().is_some_and(|e| e.is::<SegmentClosed>())
}
