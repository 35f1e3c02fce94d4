use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;
use std::thread;

use pretty_assertions::assert_eq;

use crate::testing::kv_message;
use crate::tests::context::TestContext;

/// Concurrent appenders, with frequent roll over, get unique offsets with no
/// gap, and every message is stored at the offset it was given.
#[test]
fn test_concurrent_append() -> Result<(), io::Error> {
    let mut ctx = TestContext::new()?;
    ctx.config.max_segment_bytes = Some(512);

    let log = Arc::new(ctx.new_commit_log()?);

    let num_threads = 8;
    let per_thread = 100;

    let mut handles = vec![];
    for t in 0..num_threads {
        let log = log.clone();
        handles.push(thread::spawn(move || -> Result<_, io::Error> {
            let mut appended = vec![];
            for i in 0..per_thread {
                let msg = kv_message(format!("t{}", t), format!("m{}", i));
                let offset = log.append(msg.as_bytes())?;
                appended.push((offset, msg));
            }
            Ok(appended)
        }));
    }

    let mut all = vec![];
    for h in handles {
        all.extend(h.join().unwrap()?);
    }

    let offsets = all.iter().map(|(o, _)| *o).collect::<BTreeSet<_>>();
    assert_eq!(num_threads * per_thread, offsets.len() as u64);
    assert_eq!(Some(&0), offsets.first());
    assert_eq!(Some(&(num_threads * per_thread - 1)), offsets.last());

    assert_eq!(num_threads * per_thread, log.next_offset());

    for (offset, msg) in all {
        assert_eq!(msg, log.read(offset)?);
    }

    // Segments are consecutive
    let segments = log.segments();
    for w in segments.windows(2) {
        assert_eq!(w[0].next_offset(), w[1].base_offset());
    }

    Ok(())
}

/// Readers running along with an appender always see complete messages.
#[test]
fn test_concurrent_read() -> Result<(), io::Error> {
    let mut ctx = TestContext::new()?;
    ctx.config.max_segment_bytes = Some(1024);

    let log = Arc::new(ctx.new_commit_log()?);

    let n = 500u64;
    let msg_at = |i: u64| kv_message(format!("k{:04}", i), format!("v{:04}", i));

    for i in 0..50 {
        log.append_message(&msg_at(i))?;
    }

    let writer = {
        let log = log.clone();
        thread::spawn(move || -> Result<(), io::Error> {
            for i in 50..n {
                log.append_message(&msg_at(i))?;
            }
            Ok(())
        })
    };

    let mut readers = vec![];
    for t in 0..4u64 {
        let log = log.clone();
        readers.push(thread::spawn(move || -> Result<u64, io::Error> {
            let mut read = 0;
            let mut i = t;
            while i < n {
                let next = log.next_offset();
                if i >= next {
                    thread::yield_now();
                    continue;
                }

                assert_eq!(msg_at(i), log.read(i)?);
                read += 1;
                i += 3;
            }
            Ok(read)
        }));
    }

    writer.join().unwrap()?;
    for r in readers {
        assert!(r.join().unwrap()? > 0);
    }

    let all = log.read_range(0, n)?.collect::<Result<Vec<_>, _>>()?;
    assert_eq!(n as usize, all.len());

    Ok(())
}
