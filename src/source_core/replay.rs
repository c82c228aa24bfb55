//! Rate-limited replay of a historical tick archive
//!
//! Reads a JSONL archive and writes it to an output (normally the file the
//! tick source follows) at a fixed number of ticks per second. Lines that
//! are not valid ticks are skipped.

use super::SourceError;
use crate::pipeline::types::Tick;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::{interval, MissedTickBehavior};

/// Pacing resolution of the replay timer
const TICKS_PER_SEC: u64 = 100;

/// Counts from one replay run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub written: u64,
    pub skipped: u64,
}

pub struct ReplayProducer {
    archive: PathBuf,
    rate: u32,
}

impl ReplayProducer {
    /// `rate` is ticks per second (at least 1)
    pub fn new(archive: impl AsRef<Path>, rate: u32) -> Self {
        Self {
            archive: archive.as_ref().to_path_buf(),
            rate: rate.max(1),
        }
    }

    /// Total lines allowed once `ticks` pacing ticks have elapsed
    ///
    /// Cumulative, so a rate that is not a multiple of the tick frequency
    /// still averages out exactly (150/s alternates 1 and 2 lines per tick).
    fn lines_due(&self, ticks: u64) -> u64 {
        ticks * self.rate as u64 / TICKS_PER_SEC
    }

    pub async fn run<W: AsyncWrite + Unpin>(&self, out: &mut W) -> Result<ReplayStats, SourceError> {
        let file = File::open(&self.archive).await?;
        let mut reader = BufReader::new(file);

        let mut timer = interval(Duration::from_millis(1_000 / TICKS_PER_SEC));
        timer.set_missed_tick_behavior(MissedTickBehavior::Burst);

        log::info!(
            "⏯️  Replaying {} at {} ticks/sec",
            self.archive.display(),
            self.rate
        );

        let mut stats = ReplayStats::default();
        let mut ticks = 0u64;
        let mut buf = Vec::new();

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }

            let line = String::from_utf8_lossy(&buf);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Err(e) = Tick::from_jsonl(line) {
                stats.skipped += 1;
                log::warn!("⚠️  Skipping archive line: {}", e);
                continue;
            }

            if stats.written >= self.lines_due(ticks) {
                out.flush().await?;
                while stats.written >= self.lines_due(ticks) {
                    timer.tick().await;
                    ticks += 1;
                }
            }

            out.write_all(line.as_bytes()).await?;
            out.write_all(b"\n").await?;
            stats.written += 1;
        }
        out.flush().await?;

        log::info!(
            "✅ Replay finished: {} ticks written, {} skipped",
            stats.written,
            stats.skipped
        );
        Ok(stats)
    }

    /// Append the archive to `path`, creating it (and its directory) if needed
    pub async fn run_into_file(&self, path: impl AsRef<Path>) -> Result<ReplayStats, SourceError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        self.run(&mut file).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK_A: &str = r#"{"ticker":"AAPL","open":1,"high":1,"low":1,"close":1,"volume":10,"vwap":1,"t":1000}"#;
    const TICK_B: &str = r#"{"ticker":"MSFT","open":2,"high":2,"low":2,"close":2,"volume":20,"vwap":2,"t":2000}"#;

    #[test]
    fn test_lines_due_matches_rate() {
        let producer = ReplayProducer::new("x", 1_000);
        assert_eq!(producer.lines_due(1), 10);
        assert_eq!(producer.lines_due(100), 1_000);

        // Not a multiple of the timer frequency: the remainder is spread out
        let producer = ReplayProducer::new("x", 150);
        assert_eq!(producer.lines_due(1), 1);
        assert_eq!(producer.lines_due(2), 3);
        assert_eq!(producer.lines_due(100), 150);
        assert_eq!(ReplayProducer::new("x", 250).lines_due(100), 250);

        let producer = ReplayProducer::new("x", 4);
        assert_eq!(producer.lines_due(24), 0);
        assert_eq!(producer.lines_due(25), 1);
        assert_eq!(producer.lines_due(100), 4);

        // Rate is clamped to at least one line per second
        assert_eq!(ReplayProducer::new("x", 0).lines_due(100), 1);
    }

    #[tokio::test]
    async fn test_replay_copies_valid_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("archive.jsonl");
        let mut bytes = format!("{}\nnot a tick\n\n", TICK_A).into_bytes();
        bytes.extend_from_slice(b"\xff\xfe\n");
        bytes.extend_from_slice(format!("{}\n", TICK_B).as_bytes());
        std::fs::write(&archive, bytes).unwrap();

        let output = dir.path().join("out/ticks.jsonl");
        let stats = ReplayProducer::new(&archive, 10_000)
            .run_into_file(&output)
            .await
            .unwrap();

        assert_eq!(stats, ReplayStats { written: 2, skipped: 2 });
        let written = std::fs::read_to_string(&output).unwrap();
        assert_eq!(written, format!("{}\n{}\n", TICK_A, TICK_B));
    }
}
