//! Kernel log source
//!
//! Reads `/dev/kmsg` on a dedicated thread and forwards each record to the
//! pipeline over a bounded channel. Files without kmsg record headers (for
//! example a captured `dmesg` dump) are forwarded line by line.

use crate::models::LogLine;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Seek, SeekFrom};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const DEFAULT_KMSG_PATH: &str = "/dev/kmsg";

const CHANNEL_CAPACITY: usize = 1024;

/// Parse one line read from `/dev/kmsg`.
///
/// Records look like `<prio>,<seq>,<usec>,<flags>;<message>`. Continuation
/// lines (dictionary entries) start with a space and are skipped.
pub fn parse_record(raw: &str) -> Option<LogLine> {
    let line = raw.trim_end_matches(&['\n', '\r'][..]);
    if line.is_empty() || line.starts_with(' ') {
        return None;
    }

    if let Some((header, message)) = line.split_once(';') {
        let mut fields = header.split(',');
        let prio = fields.next().and_then(|f| f.parse::<u32>().ok());
        let sequence = fields.next().and_then(|f| f.parse::<u64>().ok());
        let timestamp_us = fields.next().and_then(|f| f.parse::<u64>().ok());

        if prio.is_some() && sequence.is_some() && timestamp_us.is_some() {
            return Some(LogLine {
                message: message.to_string(),
                sequence,
                timestamp_us,
            });
        }
    }

    Some(LogLine::new(line))
}

/// Watches the kernel log for new records
pub struct KmsgWatcher {
    path: PathBuf,
    /// Deliver records already in the ring buffer instead of only new ones
    replay: bool,
}

impl KmsgWatcher {
    pub fn new(path: impl Into<PathBuf>, replay: bool) -> Self {
        Self {
            path: path.into(),
            replay,
        }
    }

    /// Open the log and start the reader thread.
    ///
    /// Fails only if the log cannot be opened. The returned channel closes
    /// when the log reaches end of file or reading fails permanently, which is
    /// how the reader thread's exit is observed.
    pub fn start(self) -> Result<mpsc::Receiver<LogLine>> {
        let mut file = File::open(&self.path)
            .with_context(|| format!("Failed to open kernel log {}", self.path.display()))?;

        if !self.replay {
            file.seek(SeekFrom::End(0))
                .with_context(|| format!("Failed to seek to end of {}", self.path.display()))?;
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let path = self.path.clone();

        std::thread::Builder::new()
            .name("kmsg-reader".to_string())
            .spawn(move || read_loop(BufReader::new(file), tx))
            .context("Failed to spawn kernel log reader")?;

        info!(path = %path.display(), replay = self.replay, "Watching kernel log");

        Ok(rx)
    }
}

fn read_loop<R: BufRead>(mut reader: R, tx: mpsc::Sender<LogLine>) {
    let mut buf = Vec::with_capacity(1024);

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => {
                debug!("Kernel log reached end of file");
                break;
            }
            Ok(_) => {
                let raw = String::from_utf8_lossy(&buf);
                if let Some(line) = parse_record(&raw) {
                    if tx.blocking_send(line).is_err() {
                        debug!("Kernel log receiver dropped");
                        break;
                    }
                }
            }
            // The ring buffer wrapped past our read position; records were lost
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                warn!("Kernel log records were overwritten before they could be read");
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                warn!(error = %e, "Failed to read kernel log");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_kmsg_record() {
        let line = parse_record("6,1234,5678901,-;oom-kill:constraint=CONSTRAINT_MEMCG\n").unwrap();
        assert_eq!(line.message, "oom-kill:constraint=CONSTRAINT_MEMCG");
        assert_eq!(line.sequence, Some(1234));
        assert_eq!(line.timestamp_us, Some(5678901));
    }

    #[test]
    fn test_parse_record_with_semicolon_in_message() {
        let line = parse_record("4,1,2,c;a;b").unwrap();
        assert_eq!(line.message, "a;b");
    }

    #[test]
    fn test_parse_skips_continuation_lines() {
        assert_eq!(parse_record(" SUBSYSTEM=memory\n"), None);
        assert_eq!(parse_record("\n"), None);
    }

    #[test]
    fn test_parse_plain_line() {
        let line = parse_record("[  12.345] Out of memory; killed\n").unwrap();
        assert_eq!(line.message, "[  12.345] Out of memory; killed");
        assert_eq!(line.sequence, None);
    }

    #[tokio::test]
    async fn test_read_loop_forwards_records_until_eof() {
        let input = "6,1,10,-;first\n SUBSYSTEM=x\n6,2,20,-;second\n";
        let (tx, mut rx) = mpsc::channel(8);

        tokio::task::spawn_blocking(move || read_loop(Cursor::new(input.as_bytes()), tx));

        assert_eq!(rx.recv().await.unwrap().message, "first");
        assert_eq!(rx.recv().await.unwrap().message, "second");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_watcher_replays_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "6,1,10,-;hello").unwrap();
        writeln!(file, "6,2,20,-;world").unwrap();
        file.flush().unwrap();

        let mut rx = KmsgWatcher::new(file.path(), true).start().unwrap();

        assert_eq!(rx.recv().await.unwrap().message, "hello");
        assert_eq!(rx.recv().await.unwrap().message, "world");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_watcher_skips_existing_records_without_replay() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "6,1,10,-;old").unwrap();
        file.flush().unwrap();

        let mut rx = KmsgWatcher::new(file.path(), false).start().unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_watcher_missing_file_is_error() {
        let result = KmsgWatcher::new("/nonexistent/kmsg", true).start();
        assert!(result.is_err());
    }
}
