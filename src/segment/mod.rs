//! A segment is one contiguous range of the commit log, stored as a `.log`
//! file of concatenated message frames and a paired `.index` file.
//!
//! A segment covers offsets `[base_offset, next_offset)`. Appends are
//! serialized by the segment's writer lock; reads use positional I/O and
//! never wait for a writer.

pub(crate) mod message_iterator;
mod recover;
pub(crate) mod segment_id;
mod stat;

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::BufReader;
use std::os::unix::fs::FileExt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;

use codeq::error_context_ext::ErrorContextExt;
use codeq::Decode;
use log::debug;
use log::info;
pub use stat::SegmentStat;

use crate::errors::ChecksumMismatch;
use crate::errors::OffsetOutOfRange;
use crate::errors::SegmentClosed;
use crate::index::Index;
use crate::index::ENTRY_SIZE;
use crate::positional_reader::PositionalReader;
use crate::segment::segment_id::SegmentId;
use crate::Config;
use crate::Message;

/// Write state, only touched with the writer lock held.
#[derive(Debug, Clone, Copy)]
struct WriteCursor {
    next_offset: u64,
    position: u64,
}

/// Files a segment owns; released together on close.
#[derive(Debug)]
struct SegmentFiles {
    log: File,
    index: Index,
}

#[derive(Debug)]
pub struct Segment {
    config: Arc<Config>,

    segment_id: SegmentId,

    max_bytes: u64,

    writer: Mutex<WriteCursor>,

    /// Published copy of the writer's `next_offset`, stored after the log
    /// bytes and the index entry are written.
    next_offset: AtomicU64,

    /// Published copy of the writer's `position`.
    position: AtomicU64,

    /// Position of the next sequential [`Segment::read`].
    read_cursor: Mutex<u64>,

    /// `None` once the segment is closed.
    files: RwLock<Option<SegmentFiles>>,

    /// Records the original log file size if a torn tail was truncated when
    /// the segment was opened.
    truncated: Option<u64>,

    /// Index entries rebuilt from the log when the segment was opened.
    rebuilt_index_entries: u64,
}

impl Segment {
    /// Opens or creates the segment starting at `base_offset` in
    /// `config.dir`, recovering its write state from the files.
    pub fn open(
        config: Arc<Config>,
        base_offset: u64,
    ) -> Result<Self, io::Error> {
        let segment_id = SegmentId(base_offset);
        let max_bytes = config.max_segment_bytes();

        if max_bytes == 0 || max_bytes > u32::MAX as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "max_segment_bytes must be in [1, {}], got {}",
                    u32::MAX,
                    max_bytes
                ),
            ));
        }

        let log_path = config.log_path(base_offset);
        let log = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&log_path)
            .context(|| format!("open {}", log_path))?;

        let index = Index::open(config.index_path(base_offset))?;

        let recovered = recover::recover(&config, segment_id, &log, &index)
            .context(|| format!("recover {}", segment_id))?;

        let next_offset = base_offset + recovered.messages;
        let position = recovered.position;

        debug!(
            "Opened {}: next_offset: {}, position: {}, max_bytes: {}",
            segment_id, next_offset, position, max_bytes
        );

        Ok(Self {
            config,
            segment_id,
            max_bytes,
            writer: Mutex::new(WriteCursor {
                next_offset,
                position,
            }),
            next_offset: AtomicU64::new(next_offset),
            position: AtomicU64::new(position),
            read_cursor: Mutex::new(0),
            files: RwLock::new(Some(SegmentFiles { log, index })),
            truncated: recovered.truncated,
            rebuilt_index_entries: recovered.rebuilt,
        })
    }

    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    /// Offset of the first message in this segment.
    pub fn base_offset(&self) -> u64 {
        self.segment_id.0
    }

    /// Offset the next appended message will get.
    pub fn next_offset(&self) -> u64 {
        self.next_offset.load(Ordering::Acquire)
    }

    /// Number of bytes written to the log file.
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn messages_count(&self) -> u64 {
        self.next_offset() - self.base_offset()
    }

    /// A full segment rejects appends, the commit log rolls over to a new
    /// one.
    pub fn is_full(&self) -> bool {
        self.position() >= self.max_bytes
    }

    pub fn is_closed(&self) -> bool {
        self.files.read().unwrap().is_none()
    }

    /// The log file size before a torn tail was truncated on open.
    pub fn truncated(&self) -> Option<u64> {
        self.truncated
    }

    pub fn rebuilt_index_entries(&self) -> u64 {
        self.rebuilt_index_entries
    }

    /// Size of the log file and the index file in bytes.
    pub fn on_disk_size(&self) -> u64 {
        self.position() + self.messages_count() * ENTRY_SIZE
    }

    /// Appends one encoded frame and returns the offset assigned to it.
    ///
    /// Returns `Ok(None)` without writing if the segment is full. On error
    /// the segment state is unchanged and the next append overwrites
    /// whatever was partially written.
    pub fn append(&self, frame: &[u8]) -> Result<Option<u64>, io::Error> {
        let mut cursor = self.writer.lock().unwrap();

        // A full segment may already be retired and closed.
        if cursor.position >= self.max_bytes {
            return Ok(None);
        }

        let guard = self.files.read().unwrap();
        let files = self.opened(&guard)?;

        let relative = cursor.next_offset - self.base_offset();
        let position = cursor.position;

        if relative > u32::MAX as u64 || position > u32::MAX as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "relative offset {} or position {} does not fit in the index of {}",
                    relative, position, self.segment_id
                ),
            ));
        }

        files.log.write_all_at(frame, position).context(|| {
            format!(
                "write {} bytes at {} to {}",
                frame.len(),
                position,
                self.segment_id
            )
        })?;

        files.index.append(relative as u32, position as u32)?;

        cursor.position += frame.len() as u64;
        cursor.next_offset += 1;

        self.position.store(cursor.position, Ordering::Release);
        self.next_offset.store(cursor.next_offset, Ordering::Release);

        Ok(Some(self.base_offset() + relative))
    }

    /// Reads log bytes at `pos` into `buf`, without touching the read
    /// cursor.
    ///
    /// Never reads past the published write position; returns `Ok(0)` at
    /// the end.
    pub fn read_at(
        &self,
        buf: &mut [u8],
        pos: u64,
    ) -> Result<usize, io::Error> {
        let guard = self.files.read().unwrap();
        let files = self.opened(&guard)?;

        let end = self.position();
        if pos >= end {
            return Ok(0);
        }

        let n = buf.len().min((end - pos) as usize);
        files.log.read_at(&mut buf[..n], pos)
    }

    /// Reads log bytes from the segment's read cursor and advances it.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, io::Error> {
        let mut cursor = self.read_cursor.lock().unwrap();
        let n = self.read_at(buf, *cursor)?;
        *cursor += n as u64;
        Ok(n)
    }

    pub fn read_cursor(&self) -> u64 {
        *self.read_cursor.lock().unwrap()
    }

    pub fn seek_read_cursor(&self, pos: u64) {
        *self.read_cursor.lock().unwrap() = pos;
    }

    /// Reads the message at the absolute `offset` and verifies its CRC.
    pub fn read_message(&self, offset: u64) -> Result<Message, io::Error> {
        let guard = self.files.read().unwrap();
        let files = self.opened(&guard)?;

        // `next_offset` is published after `position`: loading it first
        // guarantees the position covers every message below it.
        let next = self.next_offset();
        let end = self.position();

        if offset < self.base_offset() || offset >= next {
            return Err(
                OffsetOutOfRange::new(offset, self.base_offset(), next).into()
            );
        }

        let relative = (offset - self.base_offset()) as u32;
        let entry = files.index.find(relative)?;

        let mut r = BufReader::new(PositionalReader::new(
            &files.log,
            entry.position as u64,
            end,
        ));

        for _ in entry.relative_offset..relative {
            Message::decode(&mut r)?;
        }

        let msg = Message::decode(&mut r).context(|| {
            format!("read offset {} from {}", offset, self.segment_id)
        })?;

        let stored = msg.crc() as u32;
        let computed = msg.compute_crc();
        if stored != computed {
            let mismatch = ChecksumMismatch::new(stored, computed);
            return Err(mismatch.with_offset(offset).into());
        }

        Ok(msg)
    }

    /// Flushes the log and index to disk.
    pub fn sync(&self) -> Result<(), io::Error> {
        let guard = self.files.read().unwrap();
        let files = self.opened(&guard)?;

        files
            .log
            .sync_data()
            .context(|| format!("sync log of {}", self.segment_id))?;
        files.index.sync()
    }

    /// Flushes and releases both files. Closing a closed segment is a no-op.
    pub fn close(&self) -> Result<(), io::Error> {
        let files = self.files.write().unwrap().take();

        let Some(files) = files else {
            return Ok(());
        };

        files
            .log
            .sync_all()
            .context(|| format!("sync log of {} on close", self.segment_id))?;
        files.index.close()?;

        debug!("Closed {}", self.segment_id);
        Ok(())
    }

    /// Releases the files without flushing them and deletes them.
    pub fn remove(&self) -> Result<(), io::Error> {
        drop(self.files.write().unwrap().take());

        let base = self.base_offset();
        for path in [self.config.log_path(base), self.config.index_path(base)] {
            fs::remove_file(&path).context(|| format!("remove {}", path))?;
        }

        info!("Removed {}", self.segment_id);
        Ok(())
    }

    pub fn stat(&self) -> SegmentStat {
        SegmentStat {
            segment_id: self.segment_id,
            messages_count: self.messages_count(),
            next_offset: self.next_offset(),
            size: self.position(),
            max_bytes: self.max_bytes,
        }
    }

    /// Returns the file guard, or `SegmentClosed` if the segment is closed.
    ///
    /// The returned guard always holds `Some`.
    fn opened<'a>(
        &self,
        files: &'a Option<SegmentFiles>,
    ) -> Result<&'a SegmentFiles, io::Error> {
        files
            .as_ref()
            .ok_or_else(|| SegmentClosed::new(self.base_offset()).into())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::Segment;
    use crate::errors::OffsetOutOfRange;
    use crate::errors::SegmentClosed;
    use crate::testing::kv_message;
    use crate::Config;

    fn new_config(dir: &tempfile::TempDir, max_bytes: u64) -> Arc<Config> {
        let mut config = Config::new(dir.path().to_str().unwrap());
        config.max_segment_bytes = Some(max_bytes);
        Arc::new(config)
    }

    #[test]
    fn test_append_and_read_message() -> Result<(), io::Error> {
        let dir = tempfile::tempdir()?;
        let config = new_config(&dir, 1024);

        let seg = Segment::open(config, 16)?;
        assert_eq!(16, seg.base_offset());
        assert_eq!(16, seg.next_offset());
        assert_eq!(0, seg.position());

        let a = kv_message("a", "1");
        let b = kv_message("b", "22");

        assert_eq!(Some(16), seg.append(a.as_bytes())?);
        assert_eq!(Some(17), seg.append(b.as_bytes())?);

        assert_eq!(18, seg.next_offset());
        assert_eq!((a.size() + b.size()) as u64, seg.position());
        assert_eq!(2, seg.messages_count());

        assert_eq!(a, seg.read_message(16)?);
        assert_eq!(b, seg.read_message(17)?);

        for offset in [0, 15, 18] {
            let err = seg.read_message(offset).unwrap_err();
            assert_eq!(io::ErrorKind::NotFound, err.kind());
            assert_eq!(
                Some(&OffsetOutOfRange::new(offset, 16, 18)),
                err.get_ref().and_then(|e| e.downcast_ref())
            );
        }

        Ok(())
    }

    #[test]
    fn test_is_full() -> Result<(), io::Error> {
        let dir = tempfile::tempdir()?;
        let msg = kv_message("key", "value");
        let size = msg.size() as u64;

        // Room for exactly two messages.
        let seg = Segment::open(new_config(&dir, size * 2), 0)?;

        assert_eq!(Some(0), seg.append(msg.as_bytes())?);
        assert!(!seg.is_full());
        assert_eq!(Some(1), seg.append(msg.as_bytes())?);
        assert!(seg.is_full());

        assert_eq!(None, seg.append(msg.as_bytes())?);
        assert_eq!(2, seg.next_offset());
        assert_eq!(size * 2, seg.position());

        Ok(())
    }

    #[test]
    fn test_invalid_max_bytes() -> Result<(), io::Error> {
        let dir = tempfile::tempdir()?;

        for max in [0, u32::MAX as u64 + 1] {
            let err = Segment::open(new_config(&dir, max), 0).unwrap_err();
            assert_eq!(io::ErrorKind::InvalidInput, err.kind());
        }
        Ok(())
    }

    #[test]
    fn test_read_and_read_at() -> Result<(), io::Error> {
        let dir = tempfile::tempdir()?;
        let seg = Segment::open(new_config(&dir, 1024), 0)?;

        let a = kv_message("a", "1");
        let b = kv_message("b", "2");
        seg.append(a.as_bytes())?;
        seg.append(b.as_bytes())?;

        let mut want = a.as_bytes().to_vec();
        want.extend_from_slice(b.as_bytes());

        // Sequential reads advance the read cursor.
        let mut got = Vec::new();
        let mut buf = [0; 7];
        loop {
            let n = seg.read(&mut buf)?;
            if n == 0 {
                break;
            }
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(want, got);
        assert_eq!(want.len() as u64, seg.read_cursor());

        seg.seek_read_cursor(a.size() as u64);
        let mut buf = vec![0; 1024];
        let n = seg.read(&mut buf)?;
        assert_eq!(b.as_bytes(), &buf[..n]);

        // Positional reads are bounded by the write position.
        let mut buf = vec![0; 1024];
        let n = seg.read_at(&mut buf, 1)?;
        assert_eq!(&want[1..], &buf[..n]);
        assert_eq!(0, seg.read_at(&mut buf, want.len() as u64)?);

        Ok(())
    }

    #[test]
    fn test_reopen() -> Result<(), io::Error> {
        let dir = tempfile::tempdir()?;
        let config = new_config(&dir, 1024);

        let msgs = (0..5)
            .map(|i| kv_message(format!("k{}", i), format!("v{}", i)))
            .collect::<Vec<_>>();

        {
            let seg = Segment::open(config.clone(), 100)?;
            for m in msgs.iter() {
                seg.append(m.as_bytes())?;
            }
            seg.close()?;
        }

        let seg = Segment::open(config, 100)?;
        assert_eq!(105, seg.next_offset());
        assert_eq!(None, seg.truncated());

        for (i, m) in msgs.iter().enumerate() {
            assert_eq!(m, &seg.read_message(100 + i as u64)?);
        }

        assert_eq!(Some(105), seg.append(msgs[0].as_bytes())?);
        Ok(())
    }

    #[test]
    fn test_closed_segment() -> Result<(), io::Error> {
        let dir = tempfile::tempdir()?;
        let seg = Segment::open(new_config(&dir, 1024), 0)?;
        let msg = kv_message("a", "b");
        seg.append(msg.as_bytes())?;

        seg.close()?;
        assert!(seg.is_closed());

        // Idempotent
        seg.close()?;

        let is_closed = |err: io::Error| {
            err.get_ref().and_then(|e| e.downcast_ref::<SegmentClosed>())
                == Some(&SegmentClosed::new(0))
        };

        assert!(is_closed(seg.append(msg.as_bytes()).unwrap_err()));
        assert!(is_closed(seg.read_message(0).unwrap_err()));
        assert!(is_closed(seg.read_at(&mut [0; 4], 0).unwrap_err()));
        assert!(is_closed(seg.read(&mut [0; 4]).unwrap_err()));
        assert!(is_closed(seg.sync().unwrap_err()));

        Ok(())
    }

    #[test]
    fn test_remove() -> Result<(), io::Error> {
        let dir = tempfile::tempdir()?;
        let config = new_config(&dir, 1024);

        let seg = Segment::open(config.clone(), 0)?;
        seg.append(kv_message("a", "b").as_bytes())?;

        assert!(fs::metadata(config.log_path(0)).is_ok());
        assert!(fs::metadata(config.index_path(0)).is_ok());

        seg.remove()?;

        assert!(seg.is_closed());
        assert!(fs::metadata(config.log_path(0)).is_err());
        assert!(fs::metadata(config.index_path(0)).is_err());
        Ok(())
    }

    #[test]
    fn test_append_to_removed() -> Result<(), io::Error> {
        let dir = tempfile::tempdir()?;
        let msg = kv_message("a", "b");

        // Full: the caller is told to roll over, not that it is closed.
        let full = Segment::open(new_config(&dir, 1), 0)?;
        assert_eq!(Some(0), full.append(msg.as_bytes())?);
        full.remove()?;
        assert_eq!(None, full.append(msg.as_bytes())?);

        let seg = Segment::open(new_config(&dir, 1024), 5)?;
        seg.remove()?;
        let err = seg.append(msg.as_bytes()).unwrap_err();
        assert_eq!(
            Some(&SegmentClosed::new(5)),
            err.get_ref().and_then(|e| e.downcast_ref())
        );
        Ok(())
    }

    #[test]
    fn test_stat() -> Result<(), io::Error> {
        let dir = tempfile::tempdir()?;
        let seg = Segment::open(new_config(&dir, 1024), 3)?;
        let msg = kv_message("a", "b");
        seg.append(msg.as_bytes())?;

        let stat = seg.stat();
        assert_eq!(1, stat.messages_count);
        assert_eq!(4, stat.next_offset);
        assert_eq!(msg.size() as u64, stat.size);
        assert_eq!(
            "SegmentStat(SegmentId(00_000_000_000_000_000_003)){messages: 1, [000_000_003, 000_000_004), size: 000_000_024, max_bytes: 000_001_024}",
            stat.to_string()
        );
        Ok(())
    }
}
