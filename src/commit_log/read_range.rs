use std::io;

use crate::CommitLog;
use crate::Message;

/// Iterator over `(offset, message)` of a range of a [`CommitLog`].
///
/// Each message is read with [`CommitLog::read`]. Iteration stops after the
/// first error.
pub struct ReadRange<'a> {
    log: &'a CommitLog,
    next: u64,
    end: u64,
}

impl<'a> ReadRange<'a> {
    pub(crate) fn new(log: &'a CommitLog, from: u64, to: u64) -> Self {
        Self {
            log,
            next: from,
            end: to,
        }
    }
}

impl Iterator for ReadRange<'_> {
    type Item = Result<(u64, Message), io::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }

        let offset = self.next;
        let res = self.log.read(offset);

        match res {
            Ok(msg) => {
                self.next += 1;
                Some(Ok((offset, msg)))
            }
            Err(e) => {
                self.next = self.end;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.end.saturating_sub(self.next) as usize;
        (0, Some(n))
    }
}
