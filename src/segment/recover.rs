//! Rebuild the write state of a segment from its files after a restart.
//!
//! The log file is the source of truth. The index may be short (a crash
//! between a log write and its index write) or point past the log (a log
//! tail that never reached the disk); both are repaired here.

use std::fs::File;
use std::io;
use std::io::BufReader;
use std::io::Read;

use log::error;
use log::info;
use log::warn;

use crate::index::Index;
use crate::positional_reader::PositionalReader;
use crate::segment::message_iterator::MessageIterator;
use crate::segment::segment_id::SegmentId;
use crate::Config;

/// Write state of a segment rebuilt from its files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Recovered {
    /// Number of messages in the segment.
    pub(crate) messages: u64,

    /// End of the last complete message in the log file.
    pub(crate) position: u64,

    /// The original log file size if a torn tail was truncated.
    pub(crate) truncated: Option<u64>,

    /// Number of index entries rebuilt from the log.
    pub(crate) rebuilt: u64,
}

pub(crate) fn recover(
    config: &Config,
    segment_id: SegmentId,
    log: &File,
    index: &Index,
) -> Result<Recovered, io::Error> {
    let file_size = log.metadata()?.len();

    drop_untrusted_entries(segment_id, index, file_size)?;

    // Re-scan from the last trusted entry: the message it points to may be
    // incomplete too.
    let (start, start_relative) = match index.last_entry()? {
        Some(e) => (e.position as u64, e.relative_offset as u64),
        None => (0, 0),
    };

    let it = MessageIterator::new(
        BufReader::with_capacity(
            config.read_buffer_size(),
            PositionalReader::new(log, start, file_size),
        ),
        start,
        file_size,
        segment_id,
    );

    let mut relative = start_relative;
    let mut end = start;
    let mut rebuilt = 0;
    let mut truncate = false;

    for res in it {
        match res {
            Ok((position, size, _message)) => {
                if relative >= index.len() {
                    let (rel, pos) =
                        index_range(segment_id, relative, position)?;
                    index.append(rel, pos)?;
                    rebuilt += 1;
                }
                relative += 1;
                end = position + size;
            }
            Err(io_err) => {
                if io_err.kind() == io::ErrorKind::UnexpectedEof {
                    // Incomplete message, discard it and everything after.
                    truncate = config.truncate_incomplete_record();
                    if truncate {
                        break;
                    }
                } else {
                    // Maybe damaged or unfinished write with trailing
                    // zeros: data and file length may reach the disk in
                    // arbitrary order.
                    let all_zero = verify_trailing_zeros(log, end, segment_id)?;

                    if all_zero {
                        warn!(
                            "Trailing zeros detected at {} in {}; Treat it as unfinished write",
                            end, segment_id
                        );
                        truncate = config.truncate_incomplete_record();
                        if truncate {
                            break;
                        }
                    } else {
                        error!("Found damaged bytes: {}", io_err);
                    }
                }

                return Err(io_err);
            }
        }
    }

    if index.len() > relative {
        // The message of the last trusted entry is incomplete.
        index.truncate(relative)?;
    }

    if rebuilt > 0 {
        warn!(
            "Rebuilt {} index entries of {} from its log",
            rebuilt, segment_id
        );
    }

    let mut truncated = None;

    if truncate && end < file_size {
        warn!(
            "Truncate incomplete tail of {}: from {} to {}",
            segment_id, file_size, end
        );
        log.set_len(end)?;
        log.sync_all()?;
        truncated = Some(file_size);
    }

    info!(
        "Recovered {}: messages: {}, position: {}",
        segment_id, relative, end
    );

    Ok(Recovered {
        messages: relative,
        position: end,
        truncated,
        rebuilt,
    })
}

/// Drops index entries from the tail that can not be trusted.
///
/// Indexing is dense, entry `i` must have relative offset `i` and point
/// inside the log file.
fn drop_untrusted_entries(
    segment_id: SegmentId,
    index: &Index,
    file_size: u64,
) -> Result<(), io::Error> {
    let n = index.len();
    let mut trusted = n;

    while trusted > 0 {
        let entry = index.entry_at(trusted - 1)?;
        if entry.relative_offset as u64 == trusted - 1
            && (entry.position as u64) < file_size
        {
            break;
        }
        trusted -= 1;
    }

    if trusted < n {
        warn!(
            "Drop {} untrusted index entries of {}, keep {}",
            n - trusted,
            segment_id,
            trusted
        );
        index.truncate(trusted)?;
    }

    Ok(())
}

fn index_range(
    segment_id: SegmentId,
    relative: u64,
    position: u64,
) -> Result<(u32, u32), io::Error> {
    if relative > u32::MAX as u64 || position > u32::MAX as u64 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "relative offset {} or position {} exceeds u32 in {}",
                relative, position, segment_id
            ),
        ));
    }
    Ok((relative as u32, position as u32))
}

/// Checks if a file contains only zero bytes from `start_offset` to the end.
fn verify_trailing_zeros(
    file: &File,
    start_offset: u64,
    segment_id: SegmentId,
) -> Result<bool, io::Error> {
    let file_size = file.metadata()?.len();

    if start_offset > file_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "Start offset {} exceeds file size {}",
                start_offset, file_size
            ),
        ));
    }

    if file_size == start_offset {
        return Ok(true);
    }

    const WARN_THRESHOLD: u64 = 64 * 1024; // 64KB
    if file_size - start_offset > WARN_THRESHOLD {
        warn!(
            "Large maybe damaged section detected: {} bytes to the end; in {}",
            file_size - start_offset,
            segment_id
        );
    }

    const READ_CHUNK_SIZE: usize = 1024; // 1KB
    let mut reader = BufReader::with_capacity(
        16 * READ_CHUNK_SIZE,
        PositionalReader::new(file, start_offset, file_size),
    );
    let mut buffer = vec![0; READ_CHUNK_SIZE];
    let mut offset = start_offset;

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }

        for (i, byt) in buffer.iter().enumerate().take(n) {
            if *byt != 0 {
                error!(
                    "Non-zero byte detected at offset {} in {}",
                    offset + i as u64,
                    segment_id
                );
                return Ok(false);
            }
        }

        offset += n as u64;
    }
    Ok(true)
}
