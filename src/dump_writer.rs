use std::io;

use crate::num::format_pad9_u64;
use crate::Message;
use crate::SegmentId;

/// Writes one message per line, preceded by the segment it starts.
pub fn multiline_string<W: io::Write>(
    w: &mut W,
    segment_id: SegmentId,
    offset: u64,
    res: Result<(u64, u64, Message), io::Error>,
) -> Result<(), io::Error> {
    match res {
        Ok((position, size, msg)) => {
            if position == 0 {
                writeln!(w, "{}", segment_id)?;
            }
            writeln!(
                w,
                "  M-{offset:05}: [{}, {}) Size({}): {}",
                format_pad9_u64(position),
                format_pad9_u64(position + size),
                size,
                msg
            )?;
        }
        Err(io_err) => {
            writeln!(w, "Error: {}", io_err)?;
        }
    }
    Ok(())
}
