//! Visualization sink backends
//!
//! The visualization feed receives every joined record plus the alert
//! sub-stream. A failing backend is logged and counted by the caller; it
//! never stops the pipeline.

use crate::pipeline::types::{AlertNotice, JoinedRecord};
use async_trait::async_trait;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sink channel closed")]
    Closed,
}

#[async_trait]
pub trait VizSink: Send {
    /// Write one joined record (alerts and non-alerts alike)
    async fn write_record(&mut self, record: &JoinedRecord) -> Result<(), SinkError>;

    /// Write one entry of the alert sub-stream
    async fn write_alert(&mut self, alert: &AlertNotice) -> Result<(), SinkError>;

    /// Flush pending writes to storage
    async fn flush(&mut self) -> Result<(), SinkError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}

/// Event delivered by [`ChannelVizSink`]
#[derive(Debug, Clone, PartialEq)]
pub enum VizEvent {
    Record(JoinedRecord),
    Alert(AlertNotice),
}

/// In-process sink forwarding every event over a channel
///
/// Used to embed the pipeline behind another consumer (a dashboard, a test).
pub struct ChannelVizSink {
    tx: mpsc::Sender<VizEvent>,
}

impl ChannelVizSink {
    pub fn new(tx: mpsc::Sender<VizEvent>) -> Self {
        Self { tx }
    }

    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<VizEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl VizSink for ChannelVizSink {
    async fn write_record(&mut self, record: &JoinedRecord) -> Result<(), SinkError> {
        self.tx
            .send(VizEvent::Record(record.clone()))
            .await
            .map_err(|_| SinkError::Closed)
    }

    async fn write_alert(&mut self, alert: &AlertNotice) -> Result<(), SinkError> {
        self.tx
            .send(VizEvent::Alert(alert.clone()))
            .await
            .map_err(|_| SinkError::Closed)
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "Channel"
    }
}
