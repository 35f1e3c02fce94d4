use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;

/// Reads a file range `[pos, end)` with positional reads.
///
/// It never moves the file's seek cursor, so any number of readers can share
/// one file handle with each other and with a writer.
pub(crate) struct PositionalReader<'a> {
    f: &'a File,
    pos: u64,
    end: u64,
}

impl<'a> PositionalReader<'a> {
    pub(crate) fn new(f: &'a File, pos: u64, end: u64) -> Self {
        Self { f, pos, end }
    }
}

impl io::Read for PositionalReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.end {
            return Ok(0);
        }

        let n = buf.len().min((self.end - self.pos) as usize);
        let n = self.f.read_at(&mut buf[..n], self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}
