//! JSONL tick source feeding the pipeline's raw line channel

use super::reader::{StartPosition, TailReader};
use super::SourceError;
use crate::sink_core::backoff::ExponentialBackoff;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

/// Reads tick lines from a JSONL file and forwards them unparsed
///
/// In follow mode the source waits for the file to appear, tails it
/// indefinitely and survives rotation. I/O failures are retried with
/// backoff; while the source is retrying no ticks flow, so watermarks
/// simply pause.
pub struct JsonlTickSource {
    path: PathBuf,
    follow: bool,
    poll_interval: Duration,
    max_retries: u32,
}

impl JsonlTickSource {
    pub fn new(path: impl AsRef<Path>, follow: bool) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            follow,
            poll_interval: Duration::from_millis(100),
            max_retries: 10,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Forward lines until end of file (read-once mode), until the receiver
    /// goes away, or until retries are exhausted
    ///
    /// Returns the number of lines forwarded.
    pub async fn run(self, tx: mpsc::Sender<String>) -> Result<u64, SourceError> {
        let mut reader =
            TailReader::new(&self.path, self.follow).with_poll_interval(self.poll_interval);
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(100),
            Duration::from_secs(10),
            self.max_retries,
        );
        let mut forwarded = 0u64;

        log::info!(
            "📥 Tick source: {} ({})",
            self.path.display(),
            if self.follow { "follow" } else { "read once" }
        );

        loop {
            if !reader.is_open() {
                if let Err(e) = reader.open(StartPosition::Beginning).await {
                    log::warn!("⚠️  Cannot open {}: {}", self.path.display(), e);
                    backoff.sleep().await?;
                    continue;
                }
                backoff.reset();
            }

            match reader.read_line().await {
                Ok(Some(line)) => {
                    backoff.reset();
                    if tx.send(line).await.is_err() {
                        log::info!("🛑 Pipeline input closed, stopping tick source");
                        break;
                    }
                    forwarded += 1;
                }
                Ok(None) => {
                    log::info!("✅ Reached end of {}", self.path.display());
                    break;
                }
                Err(e) => {
                    log::warn!("⚠️  Read error on {}: {}", self.path.display(), e);
                    // Keep the handle: the next read resumes where this one failed
                    backoff.sleep().await?;
                }
            }
        }

        log::info!("📥 Tick source forwarded {} lines", forwarded);
        Ok(forwarded)
    }
}
