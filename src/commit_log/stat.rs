use std::fmt;
use std::fmt::Formatter;

use crate::num::format_pad9_u64;
use crate::SegmentStat;

/// Statistics about a commit log: every closed segment and the active one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    /// Segments that no longer receive appends, oldest first
    pub closed_segments: Vec<SegmentStat>,
    /// The segment appends go to
    pub active_segment: SegmentStat,
    /// Size of the log and index files of every segment in bytes
    pub on_disk_size: u64,
}

impl Stat {
    /// Offset of the first message in the log.
    pub fn first_offset(&self) -> u64 {
        self.closed_segments
            .first()
            .unwrap_or(&self.active_segment)
            .segment_id
            .base_offset()
    }

    /// Offset the next appended message will get.
    pub fn next_offset(&self) -> u64 {
        self.active_segment.next_offset
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let lb = if f.alternate() { "\n" } else { "" };
        let idt = if f.alternate() { "  " } else { "" };
        write!(
            f,
            "Stat{{{lb} closed_segments: [{lb}{idt}{}{lb} ],{lb} active_segment: {},{lb} on_disk_size: {}{lb}}}",
            self.closed_segments
                .iter()
                .map(|c| format!("{}", c))
                .collect::<Vec<String>>()
                .join(&format!(",{lb}{idt}")),
            self.active_segment,
            format_pad9_u64(self.on_disk_size),
        )
    }
}
