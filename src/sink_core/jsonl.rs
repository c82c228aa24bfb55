use crate::pipeline::types::{AlertNotice, JoinedRecord};
use crate::sink_core::viz::{SinkError, VizSink};
use async_trait::async_trait;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Append-only JSONL file with size-based rotation
///
/// `events.jsonl` rotates to `events.jsonl.1`, older files shift up to
/// `events.jsonl.{max_rotations}` and the oldest is deleted.
pub struct RotatingJsonlWriter {
    file: BufWriter<File>,
    current_size: u64,
    max_size: u64,
    base_path: PathBuf,
    rotation_count: u32,
    max_rotations: u32,
}

impl RotatingJsonlWriter {
    pub fn new(path: impl AsRef<Path>, max_size_mb: u64, max_rotations: u32) -> Result<Self, SinkError> {
        Self::with_max_bytes(path, max_size_mb.saturating_mul(1024 * 1024), max_rotations)
    }

    pub fn with_max_bytes(
        path: impl AsRef<Path>,
        max_size: u64,
        max_rotations: u32,
    ) -> Result<Self, SinkError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let current_size = file.metadata()?.len();

        Ok(Self {
            file: BufWriter::new(file),
            current_size,
            max_size,
            base_path: path.to_path_buf(),
            rotation_count: 0,
            max_rotations,
        })
    }

    pub fn write_line<T: Serialize>(&mut self, value: &T) -> Result<(), SinkError> {
        let json = serde_json::to_string(value)?;
        writeln!(self.file, "{}", json)?;

        self.current_size += (json.len() + 1) as u64;

        if self.current_size >= self.max_size {
            self.rotate()?;
        }

        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), SinkError> {
        self.file.flush()?;
        Ok(())
    }

    fn rotated_path(&self, index: u32) -> PathBuf {
        let mut name = self.base_path.clone().into_os_string();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> Result<(), SinkError> {
        self.file.flush()?;

        if self.max_rotations == 0 {
            // No history kept: truncate in place
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.base_path)?;
            self.file = BufWriter::new(file);
            self.current_size = 0;
            self.rotation_count += 1;
            return Ok(());
        }

        let oldest = self.rotated_path(self.max_rotations);
        if oldest.exists() {
            std::fs::remove_file(&oldest)?;
        }
        for i in (1..self.max_rotations).rev() {
            let old_path = self.rotated_path(i);
            if old_path.exists() {
                std::fs::rename(&old_path, self.rotated_path(i + 1))?;
            }
        }

        if self.base_path.exists() {
            std::fs::rename(&self.base_path, self.rotated_path(1))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.base_path)?;

        self.file = BufWriter::new(file);
        self.current_size = 0;
        self.rotation_count += 1;

        log::info!(
            "📄 Rotated {} (rotation #{})",
            self.base_path.display(),
            self.rotation_count
        );

        Ok(())
    }
}

/// Visualization feed as two JSONL files in one directory
///
/// - `joined.jsonl`: every joined record
/// - `alerts.jsonl`: alert sub-stream (ticker, t, vwap, action)
pub struct JsonlVizSink {
    joined: RotatingJsonlWriter,
    alerts: RotatingJsonlWriter,
}

impl JsonlVizSink {
    pub fn new(dir: impl AsRef<Path>, max_size_mb: u64, max_rotations: u32) -> Result<Self, SinkError> {
        let dir = dir.as_ref();
        Ok(Self {
            joined: RotatingJsonlWriter::new(dir.join("joined.jsonl"), max_size_mb, max_rotations)?,
            alerts: RotatingJsonlWriter::new(dir.join("alerts.jsonl"), max_size_mb, max_rotations)?,
        })
    }
}

#[async_trait]
impl VizSink for JsonlVizSink {
    async fn write_record(&mut self, record: &JoinedRecord) -> Result<(), SinkError> {
        self.joined.write_line(record)
    }

    async fn write_alert(&mut self, alert: &AlertNotice) -> Result<(), SinkError> {
        self.alerts.write_line(alert)
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.joined.flush()?;
        self.alerts.flush()
    }

    fn backend_type(&self) -> &'static str {
        "JSONL"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{millis_to_utc, Action};

    fn record(vwap: f64, is_alert: bool) -> JoinedRecord {
        JoinedRecord {
            instrument: "AAPL".to_string(),
            t: millis_to_utc(1_700_000_040_000).unwrap(),
            volume: 15_000.0,
            vwap,
            bollinger_upper: 100.0,
            bollinger_lower: 90.0,
            is_alert,
            action: if is_alert { Action::Sell } else { Action::Hodl },
        }
    }

    #[tokio::test]
    async fn test_viz_sink_writes_both_feeds() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonlVizSink::new(dir.path(), 100, 3).unwrap();

        let alert_record = record(105.0, true);
        sink.write_record(&record(95.0, false)).await.unwrap();
        sink.write_record(&alert_record).await.unwrap();
        sink.write_alert(&AlertNotice::from_record(&alert_record).unwrap())
            .await
            .unwrap();
        sink.flush().await.unwrap();

        let joined = std::fs::read_to_string(dir.path().join("joined.jsonl")).unwrap();
        let lines: Vec<&str> = joined.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed["ticker"], "AAPL");
        assert_eq!(parsed["action"], "sell");
        assert_eq!(parsed["is_alert"], true);

        let alerts = std::fs::read_to_string(dir.path().join("alerts.jsonl")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(alerts.trim()).unwrap();
        assert_eq!(parsed["vwap"], 105.0);
        assert_eq!(parsed["action"], "sell");
    }

    #[test]
    fn test_rotation_keeps_bounded_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.jsonl");
        let mut writer = RotatingJsonlWriter::with_max_bytes(&path, 1, 2).unwrap();

        for i in 0..4 {
            writer.write_line(&serde_json::json!({ "n": i })).unwrap();
        }
        writer.flush().unwrap();

        // Every write rotates: the live file is empty, two generations kept
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
        let newest = std::fs::read_to_string(dir.path().join("feed.jsonl.1")).unwrap();
        assert_eq!(newest.trim(), r#"{"n":3}"#);
        let older = std::fs::read_to_string(dir.path().join("feed.jsonl.2")).unwrap();
        assert_eq!(older.trim(), r#"{"n":2}"#);
        assert!(!dir.path().join("feed.jsonl.3").exists());
    }
}
