use std::fmt;
use std::fmt::Formatter;

use crate::num::format_pad9_u64;
use crate::SegmentId;

/// Statistics about a single segment of the commit log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentStat {
    /// Unique identifier for this segment
    pub segment_id: SegmentId,
    /// Number of messages stored in this segment
    pub messages_count: u64,
    /// Offset of the last message in this segment plus one
    pub next_offset: u64,
    /// Size of the log file in bytes
    pub size: u64,
    /// Size at which the segment is full
    pub max_bytes: u64,
}

impl fmt::Display for SegmentStat {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SegmentStat({}){{messages: {}, [{}, {}), size: {}, max_bytes: {}}}",
            self.segment_id,
            self.messages_count,
            format_pad9_u64(self.segment_id.base_offset()),
            format_pad9_u64(self.next_offset),
            format_pad9_u64(self.size),
            format_pad9_u64(self.max_bytes),
        )
    }
}
