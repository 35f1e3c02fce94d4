use std::io;

use codeq::error_context_ext::ErrorContextExt;
use codeq::Decode;

use crate::offset_reader::OffsetReader;
use crate::segment::segment_id::SegmentId;
use crate::Message;

/// Iterates `(position, size, message)` of every frame in a log file, from
/// `start` up to `total_size`.
///
/// Every frame's CRC is verified. Iteration stops after the first error.
pub(crate) struct MessageIterator<R> {
    r: OffsetReader<R>,
    total_size: u64,
    segment_id: SegmentId,
    stopped: bool,
}

impl<R> MessageIterator<R>
where R: io::Read
{
    /// `r` must be positioned at byte `start` of the log file.
    pub(crate) fn new(
        r: R,
        start: u64,
        total_size: u64,
        segment_id: SegmentId,
    ) -> Self {
        Self {
            r: OffsetReader::new(r, start),
            total_size,
            segment_id,
            stopped: false,
        }
    }
}

impl<R> Iterator for MessageIterator<R>
where R: io::Read
{
    type Item = Result<(u64, u64, Message), io::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stopped {
            return None;
        }

        let position = self.r.offset();
        if position >= self.total_size {
            return None;
        }

        let res = Message::decode(&mut self.r)
            .and_then(|msg| {
                msg.verify_crc()?;
                Ok(msg)
            })
            .map(|msg| (position, self.r.offset() - position, msg))
            .context(|| format!("decode Message at position {}", position))
            .context(|| format!("iterate {}", self.segment_id));

        self.stopped = res.is_err();

        Some(res)
    }
}
