//! Asynchronous JSONL line reader with follow mode and rotation detection

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::time::sleep;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

/// Where a freshly opened file is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    Beginning,
    End,
}

pub struct TailReader {
    path: PathBuf,
    file: Option<BufReader<File>>,
    inode: Option<u64>,
    position: u64,
    partial: Vec<u8>,
    follow: bool,
    poll_interval: Duration,
}

impl TailReader {
    /// `follow = false` reads to the end of the file once;
    /// `follow = true` keeps waiting for appended lines
    pub fn new(path: impl AsRef<Path>, follow: bool) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
            inode: None,
            position: 0,
            partial: Vec::new(),
            follow,
            poll_interval: Duration::from_millis(100),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub async fn open(&mut self, start: StartPosition) -> std::io::Result<()> {
        let file = File::open(&self.path).await?;
        let metadata = file.metadata().await?;

        #[cfg(unix)]
        {
            self.inode = Some(metadata.ino());
        }

        let mut reader = BufReader::new(file);
        self.position = match start {
            StartPosition::Beginning => 0,
            StartPosition::End => reader.seek(std::io::SeekFrom::End(0)).await?,
        };
        self.partial.clear();
        self.file = Some(reader);

        log::info!(
            "📖 Reading {} from {} (follow: {}, {} bytes)",
            self.path.display(),
            match start {
                StartPosition::Beginning => "start",
                StartPosition::End => "end",
            },
            self.follow,
            metadata.len()
        );
        Ok(())
    }

    /// Read the next non-empty line
    ///
    /// Returns `Ok(None)` at end of file when not following. In follow mode
    /// this waits for new data, and reopens the file from the start when it
    /// was rotated or truncated. A trailing line without a newline is held
    /// back until it is completed.
    ///
    /// Invalid UTF-8 is replaced rather than reported as an I/O error, so a
    /// corrupt line reaches the parser and is rejected there.
    pub async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            let Some(reader) = self.file.as_mut() else {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "File not opened",
                ));
            };

            let n = reader.read_until(b'\n', &mut self.partial).await?;
            self.position += n as u64;

            if n > 0 {
                if !self.partial.ends_with(b"\n") && self.follow {
                    continue;
                }
                match self.take_line() {
                    Some(line) => return Ok(Some(line)),
                    None => continue,
                }
            }

            // End of file
            if !self.follow {
                return Ok(self.take_line());
            }

            if self.detect_rotation().await? {
                log::info!("🔄 File rotation detected, reopening: {}", self.path.display());
                self.open(StartPosition::Beginning).await?;
                continue;
            }

            sleep(self.poll_interval).await;
        }
    }

    /// Decode and clear the buffered line; None when it is blank
    fn take_line(&mut self) -> Option<String> {
        let bytes = std::mem::take(&mut self.partial);
        let line = String::from_utf8_lossy(&bytes);
        if let std::borrow::Cow::Owned(_) = line {
            log::warn!("⚠️  Invalid UTF-8 in {}, forwarding lossy line", self.path.display());
        }
        let line = line.trim();
        (!line.is_empty()).then(|| line.to_string())
    }

    /// True if the path now points at a different file, or the file shrank
    async fn detect_rotation(&self) -> std::io::Result<bool> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            // Rotated away and not yet recreated
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };

        #[cfg(unix)]
        {
            if self.inode.map_or(false, |old| old != metadata.ino()) {
                return Ok(true);
            }
        }

        Ok(metadata.len() < self.position)
    }
}
