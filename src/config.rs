use std::fmt;
use std::str::FromStr;

use crate::errors::InvalidSegmentFileName;

/// Suffix of a segment's message file.
pub const LOG_SUFFIX: &str = ".log";

/// Suffix of a segment's offset index file.
pub const INDEX_SUFFIX: &str = ".index";

/// Suffix of a segment rewritten by a cleaner, staged before it atomically
/// replaces the `.log`/`.index` pair.
pub const CLEANED_SUFFIX: &str = ".cleaned";

/// Retention rule deciding which old segments [`clean`] may retire.
///
/// [`clean`]: crate::CommitLog::clean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanupPolicy {
    /// Retire the oldest segments while the log exceeds `max_log_bytes`.
    #[default]
    Delete,

    /// Segments are rewritten by an external compactor, staged as
    /// `.cleaned` files. No segment is retired by the log itself.
    Compact,
}

impl fmt::Display for CleanupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupPolicy::Delete => write!(f, "delete"),
            CleanupPolicy::Compact => write!(f, "compact"),
        }
    }
}

impl FromStr for CleanupPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "delete" => Ok(CleanupPolicy::Delete),
            "compact" => Ok(CleanupPolicy::Compact),
            _ => Err(format!(
                "unknown cleanup policy: '{}', expect 'delete' or 'compact'",
                s
            )),
        }
    }
}

/// Configuration for a commit log.
///
/// Optional parameters are `Option<T>` in this struct, and default values is
/// evaluated when a getter method is called.
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// Directory holding the segment files.
    pub dir: String,

    /// Max number of bytes a segment can contain, once the limit is hit a
    /// new segment will be split off.
    pub max_segment_bytes: Option<u64>,

    /// Max number of bytes of all segments before [`CleanupPolicy::Delete`]
    /// retires the oldest ones.
    pub max_log_bytes: Option<u64>,

    /// Retention rule applied by `CommitLog::clean()`.
    pub cleanup_policy: Option<CleanupPolicy>,

    /// Whether to truncate a half written message at the tail of a segment
    /// when it is opened.
    ///
    /// If truncate, the segment is considered successfully opened.
    /// Otherwise, an io::Error will be returned.
    pub truncate_incomplete_record: Option<bool>,

    /// Size of the read buffer used when scanning a segment, in bytes.
    pub read_buffer_size: Option<usize>,
}

impl Config {
    /// Creates a new Config with the specified directory and default values for
    /// other fields
    pub fn new(dir: impl ToString) -> Self {
        Self {
            dir: dir.to_string(),
            ..Default::default()
        }
    }

    /// Creates a new Config with the four options a commit log is opened
    /// with.
    pub fn new_full(
        dir: impl ToString,
        max_segment_bytes: Option<u64>,
        max_log_bytes: Option<u64>,
        cleanup_policy: Option<CleanupPolicy>,
    ) -> Self {
        Self {
            dir: dir.to_string(),
            max_segment_bytes,
            max_log_bytes,
            cleanup_policy,
            ..Default::default()
        }
    }

    /// Returns the max size of a segment in bytes (defaults to 1GB)
    pub fn max_segment_bytes(&self) -> u64 {
        self.max_segment_bytes.unwrap_or(1024 * 1024 * 1024)
    }

    /// Returns the max size of the whole log in bytes (defaults to unlimited)
    pub fn max_log_bytes(&self) -> u64 {
        self.max_log_bytes.unwrap_or(u64::MAX)
    }

    /// Returns the cleanup policy (defaults to [`CleanupPolicy::Delete`])
    pub fn cleanup_policy(&self) -> CleanupPolicy {
        self.cleanup_policy.unwrap_or_default()
    }

    /// Returns whether to truncate incomplete records (defaults to true)
    pub fn truncate_incomplete_record(&self) -> bool {
        self.truncate_incomplete_record.unwrap_or(true)
    }

    /// Returns the size of read buffer in bytes (defaults to 64KB)
    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size.unwrap_or(64 * 1024)
    }

    /// Returns the full path of the log file of the segment at `base_offset`
    pub fn log_path(&self, base_offset: u64) -> String {
        self.segment_path(base_offset, LOG_SUFFIX)
    }

    /// Returns the full path of the index file of the segment at
    /// `base_offset`
    pub fn index_path(&self, base_offset: u64) -> String {
        self.segment_path(base_offset, INDEX_SUFFIX)
    }

    /// Returns the full path of the staged cleaned file of the segment at
    /// `base_offset`
    pub fn cleaned_path(&self, base_offset: u64) -> String {
        self.segment_path(base_offset, CLEANED_SUFFIX)
    }

    fn segment_path(&self, base_offset: u64, suffix: &str) -> String {
        let file_name = Self::segment_file_name(base_offset, suffix);
        format!("{}/{}", self.dir, file_name)
    }

    /// Generates the file name for a segment file.
    ///
    /// The file name format is "{20 digit zero padded base offset}{suffix}"
    pub(crate) fn segment_file_name(base_offset: u64, suffix: &str) -> String {
        format!("{:020}{}", base_offset, suffix)
    }

    /// Parses a segment file name and returns the base offset.
    ///
    /// # Arguments
    /// * `file_name` - Name of the segment file (format:
    ///   "{20 digit base offset}{suffix}")
    /// * `suffix` - The expected suffix, such as [`LOG_SUFFIX`]
    ///
    /// # Returns
    /// * `Ok(u64)` - The base offset if parsing succeeds
    /// * `Err(InvalidSegmentFileName)` - If the file name format is invalid
    pub(crate) fn parse_segment_file_name(
        file_name: &str,
        suffix: &str,
    ) -> Result<u64, InvalidSegmentFileName> {
        let digits = file_name.strip_suffix(suffix).ok_or_else(|| {
            InvalidSegmentFileName::new(
                file_name,
                format!("has no '{}' suffix", suffix),
            )
        })?;

        if digits.len() != 20 {
            return Err(InvalidSegmentFileName::new(
                file_name,
                "does not have 20 digits before the suffix",
            ));
        }

        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(InvalidSegmentFileName::new(
                file_name,
                "contains non-digit characters",
            ));
        }

        digits.parse::<u64>().map_err(|e| {
            InvalidSegmentFileName::new(
                file_name,
                format!("cannot parse as u64: {}", e),
            )
        })
    }
}
