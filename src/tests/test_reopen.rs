//! Tests for reopening a CommitLog under various conditions.
//!
//! These tests verify that a CommitLog can be correctly reopened after:
//! - Normal shutdown
//! - Shutdown without close
//! - A short or stale index
//! - Partial writes and zero-filled tail
//! - Damaged messages

use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;

use pretty_assertions::assert_eq;

use crate::testing::kv_message;
use crate::tests::context::TestContext;
use crate::Message;
use crate::SegmentId;

const LOG_0: &str = "00000000000000000000.log";
const INDEX_0: &str = "00000000000000000000.index";

fn sample_messages(n: u64) -> Vec<Message> {
    (0..n)
        .map(|i| kv_message(format!("key-{}", i), format!("value-{}", i)))
        .collect()
}

fn append_all(ctx: &TestContext, msgs: &[Message]) -> Result<(), io::Error> {
    let log = ctx.new_commit_log()?;
    for m in msgs {
        log.append_message(m)?;
    }
    log.close()
}

fn append_to_file(path: &str, bytes: &[u8]) -> Result<(), io::Error> {
    let mut f = OpenOptions::new().append(true).open(path)?;
    f.write_all(bytes)?;
    f.sync_all()
}

#[test]
fn test_re_open() -> Result<(), io::Error> {
    let mut ctx = TestContext::new()?;
    ctx.config.max_segment_bytes = Some(100);

    let msgs = sample_messages(10);
    append_all(&ctx, &msgs)?;

    let log = ctx.new_commit_log()?;
    assert_eq!(10, log.next_offset());
    assert!(log.segment_ids().len() > 1);

    for (i, m) in msgs.iter().enumerate() {
        assert_eq!(m, &log.read(i as u64)?);
    }

    // No duplicate or skipped offsets after reopen.
    assert_eq!(10, log.append_message(&msgs[0])?);
    assert_eq!(11, log.append_message(&msgs[1])?);

    Ok(())
}

#[test]
fn test_re_open_without_close() -> Result<(), io::Error> {
    let ctx = TestContext::new()?;
    let msgs = sample_messages(3);

    {
        let log = ctx.new_commit_log()?;
        for m in msgs.iter() {
            log.append_message(m)?;
        }
    }

    let log = ctx.new_commit_log()?;
    assert_eq!(3, log.next_offset());
    assert_eq!(msgs[2], log.read(2)?);
    Ok(())
}

/// A crash between a log write and its index write leaves the index short.
#[test]
fn test_rebuild_missing_index_entries() -> Result<(), io::Error> {
    let ctx = TestContext::new()?;
    let msgs = sample_messages(5);
    append_all(&ctx, &msgs)?;

    let index_path = ctx.path(INDEX_0);
    OpenOptions::new().write(true).open(&index_path)?.set_len(2 * 8)?;

    let log = ctx.new_commit_log()?;
    assert_eq!(5, log.next_offset());
    assert_eq!(5 * 8, fs::metadata(&index_path)?.len());
    assert_eq!(3, log.segments()[0].rebuilt_index_entries());

    for (i, m) in msgs.iter().enumerate() {
        assert_eq!(m, &log.read(i as u64)?);
    }

    // Without any index
    log.close()?;
    fs::remove_file(&index_path)?;

    let log = ctx.new_commit_log()?;
    assert_eq!(5, log.next_offset());
    assert_eq!(5, log.segments()[0].rebuilt_index_entries());
    assert_eq!(msgs[3], log.read(3)?);
    Ok(())
}

/// The index points beyond a log whose tail never reached the disk.
#[test]
fn test_drop_index_entries_beyond_log() -> Result<(), io::Error> {
    let ctx = TestContext::new()?;
    let msgs = sample_messages(3);
    append_all(&ctx, &msgs)?;

    let size = msgs[0].size() as u64;
    let log_path = ctx.path(LOG_0);
    OpenOptions::new().write(true).open(&log_path)?.set_len(size + 5)?;

    let log = ctx.new_commit_log()?;
    assert_eq!(1, log.next_offset());
    assert_eq!(8, fs::metadata(ctx.path(INDEX_0))?.len());
    assert_eq!(size, fs::metadata(&log_path)?.len());
    assert_eq!(Some(size + 5), log.segments()[0].truncated());

    assert_eq!(msgs[0], log.read(0)?);
    assert_eq!(1, log.append_message(&msgs[2])?);
    assert_eq!(msgs[2], log.read(1)?);
    Ok(())
}

#[test]
fn test_truncate_incomplete_message() -> Result<(), io::Error> {
    let ctx = TestContext::new()?;
    let msgs = sample_messages(3);
    append_all(&ctx, &msgs)?;

    let size = msgs[0].size() as u64;
    let log_path = ctx.path(LOG_0);
    append_to_file(&log_path, &msgs[0].as_bytes()[..10])?;

    let log = ctx.new_commit_log()?;
    assert_eq!(3, log.next_offset());
    assert_eq!(Some(3 * size + 10), log.segments()[0].truncated());
    assert_eq!(3 * size, fs::metadata(&log_path)?.len());

    assert_eq!(3, log.append_message(&msgs[1])?);
    assert_eq!(msgs[1], log.read(3)?);
    Ok(())
}

#[test]
fn test_incomplete_message_no_truncate() -> Result<(), io::Error> {
    let mut ctx = TestContext::new()?;
    let msgs = sample_messages(3);
    append_all(&ctx, &msgs)?;

    append_to_file(&ctx.path(LOG_0), &msgs[0].as_bytes()[..10])?;

    ctx.config.truncate_incomplete_record = Some(false);

    let err = ctx.new_commit_log().unwrap_err();
    assert_eq!(io::ErrorKind::UnexpectedEof, err.kind());
    Ok(())
}

#[test]
fn test_truncate_trailing_zeros() -> Result<(), io::Error> {
    let ctx = TestContext::new()?;
    let msgs = sample_messages(3);
    append_all(&ctx, &msgs)?;

    let size = msgs[0].size() as u64;
    let log_path = ctx.path(LOG_0);
    append_to_file(&log_path, &[0; 100])?;

    let log = ctx.new_commit_log()?;
    assert_eq!(3, log.next_offset());
    assert_eq!(Some(3 * size + 100), log.segments()[0].truncated());
    assert_eq!(3 * size, fs::metadata(&log_path)?.len());
    Ok(())
}

#[test]
fn test_damaged_message() -> Result<(), io::Error> {
    let ctx = TestContext::new()?;
    let msgs = sample_messages(3);
    append_all(&ctx, &msgs)?;

    let log_path = ctx.path(LOG_0);
    let mut bytes = fs::read(&log_path)?;

    // Damage the key of message 1; the index is removed so the whole log is
    // scanned.
    let size = msgs[0].size() as usize;
    bytes[size + 20] ^= 0x01;
    fs::write(&log_path, &bytes)?;
    fs::remove_file(ctx.path(INDEX_0))?;

    let err = ctx.new_commit_log().unwrap_err();
    assert_eq!(io::ErrorKind::InvalidData, err.kind());

    // Damaged bytes are never truncated.
    assert_eq!(bytes.len() as u64, fs::metadata(&log_path)?.len());
    Ok(())
}

#[test]
fn test_remove_stale_cleaned_files() -> Result<(), io::Error> {
    let ctx = TestContext::new()?;
    let msgs = sample_messages(2);
    append_all(&ctx, &msgs)?;

    let cleaned = ctx.path("00000000000000000000.cleaned");
    fs::write(&cleaned, b"partial compaction")?;

    let log = ctx.new_commit_log()?;
    assert!(fs::metadata(&cleaned).is_err());
    assert_eq!(msgs[1], log.read(1)?);
    Ok(())
}

#[test]
fn test_ignore_invalid_file_names() -> Result<(), io::Error> {
    let ctx = TestContext::new()?;
    let msgs = sample_messages(2);
    append_all(&ctx, &msgs)?;

    fs::write(ctx.path("foo.log"), b"")?;
    fs::write(ctx.path("README"), b"")?;

    let log = ctx.new_commit_log()?;
    assert_eq!(vec![SegmentId(0)], log.segment_ids());
    assert_eq!(2, log.next_offset());
    Ok(())
}

#[test]
fn test_gap_between_segments() -> Result<(), io::Error> {
    let ctx = TestContext::new()?;
    let msgs = sample_messages(3);
    append_all(&ctx, &msgs)?;

    fs::write(ctx.path("00000000000000000100.log"), b"")?;

    let err = ctx.new_commit_log().unwrap_err();
    assert_eq!(io::ErrorKind::InvalidData, err.kind());
    Ok(())
}
