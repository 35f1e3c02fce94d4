use std::fs::File;
use std::io;
use std::io::BufReader;
use std::sync::Arc;

use codeq::error_context_ext::ErrorContextExt;

use crate::dump_writer;
use crate::segment::message_iterator::MessageIterator;
use crate::CommitLog;
use crate::Config;
use crate::Message;
use crate::SegmentId;

/// Read-only dump of a commit log directory.
///
/// Segment files are opened read-only and scanned as they are; nothing is
/// recovered or truncated, a damaged message is reported as an error line.
pub struct Dump {
    config: Arc<Config>,
}

impl Dump {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    pub fn write_to_string(&self) -> Result<String, io::Error> {
        let mut buf = Vec::new();
        self.write(&mut buf)?;
        String::from_utf8(buf)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    pub fn write<W: io::Write>(&self, mut w: W) -> Result<(), io::Error> {
        writeln!(&mut w, "CommitLog:")?;
        self.write_with(w, dump_writer::multiline_string)
    }

    /// Writes every message with a custom writer function.
    ///
    /// `write_message` receives the segment, the offset of the message and
    /// either `(position, size, message)` or the error that stopped the
    /// scan of that segment.
    pub fn write_with<W: io::Write, D>(
        &self,
        mut w: W,
        write_message: D,
    ) -> Result<(), io::Error>
    where
        D: Fn(
            &mut W,
            SegmentId,
            u64,
            Result<(u64, u64, Message), io::Error>,
        ) -> Result<(), io::Error>,
    {
        let config = self.config.as_ref();
        let segment_ids = CommitLog::load_segment_ids(config)?;

        for segment_id in segment_ids {
            let path = config.log_path(segment_id.base_offset());
            let f = File::open(&path).context(|| format!("dump {}", path))?;
            let file_size = f.metadata()?.len();

            let it = MessageIterator::new(
                BufReader::with_capacity(config.read_buffer_size(), f),
                0,
                file_size,
                segment_id,
            );

            for (i, res) in it.enumerate() {
                let offset = segment_id.base_offset() + i as u64;
                write_message(&mut w, segment_id, offset, res)?;
            }
        }
        Ok(())
    }
}
