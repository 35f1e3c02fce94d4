use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use commit_log::CommitLog;
use commit_log::Config;
use commit_log::Message;

#[derive(Clone, Debug, PartialEq, Eq, clap::Parser)]
#[clap(about = "append and read back CommitLog messages", author)]
pub struct Args {
    /// Directory of the log, it should be empty
    #[arg(long, value_name = "PATH")]
    dir: PathBuf,

    /// Number of messages to append
    #[arg(long, default_value_t = 1024 * 1024)]
    count: u64,

    /// Size of the value of each message in bytes
    #[arg(long, default_value_t = 100)]
    size: usize,

    /// Max size of a segment in bytes
    #[arg(long, default_value_t = 256 * 1024 * 1024)]
    max_segment_bytes: u64,

    /// Print progress every this many messages
    #[arg(long, default_value_t = 100_000)]
    step: u64,
}

fn main() -> Result<(), io::Error> {
    let args = Args::parse();

    let config = Config::new_full(
        args.dir.to_string_lossy(),
        Some(args.max_segment_bytes),
        None,
        None,
    );

    let log = CommitLog::open(Arc::new(config))?;

    let value = vec![b'x'; args.size];
    let msg =
        Message::from_parts(1, 0, 0, Some(b"key"), Some(value.as_slice()));

    let start = Instant::now();
    let mut step_start = Instant::now();

    for i in 0..args.count {
        log.append_message(&msg)?;

        if i > 0 && i % args.step.max(1) == 0 {
            let elapsed = step_start.elapsed();
            println!(
                "append: {}, elapsed: {:?}, {} ops/ms",
                i,
                elapsed,
                args.step / (elapsed.as_millis() as u64 + 1)
            );
            step_start = Instant::now();
        }
    }

    log.sync()?;
    report("append", args.count, msg.size() as u64, start);

    let start = Instant::now();
    let first = log.first_offset();
    for offset in first..log.next_offset() {
        let got = log.read(offset)?;
        if got.value().map(|v| v.len()) != Some(args.size) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected message at {}: {}", offset, got),
            ));
        }
    }
    report("read", args.count, msg.size() as u64, start);

    println!("{:#}", log.stat());

    log.close()
}

fn report(name: &str, count: u64, message_size: u64, start: Instant) {
    let elapsed = start.elapsed();
    let millis = elapsed.as_millis() as u64 + 1;
    println!(
        "{}: {} messages in {:?}, {} ops/ms, {} MB/s",
        name,
        count,
        elapsed,
        count / millis,
        count * message_size * 1000 / millis / 1024 / 1024
    );
}
