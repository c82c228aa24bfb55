//! Stage wiring and lifecycle
//!
//! ```text
//! lines ─► ingestion ─► shard[0..N] ─► join ─► fan-out
//! ```
//!
//! Every stage owns its state and talks to the next through a bounded
//! channel. Shutdown is a cascade: dropping the line sender ends ingestion,
//! which drops the shard senders, and so on down to the fan-out stage.

use super::checkpoint::{CheckpointError, CheckpointStore};
use super::classifier::AlertClassifier;
use super::config::{ConfigError, PipelineConfig};
use super::engine::{run_window_shard, WindowEngine};
use super::fanout::FanoutStage;
use super::ingestion::{shard_for, start_pipeline_ingestion};
use super::join::run_join_stage;
use super::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::sink_core::dispatcher::NotificationDispatcher;
use crate::sink_core::notifier::Notifier;
use crate::sink_core::viz::VizSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Stage `{stage}` panicked: {source}")]
    Task {
        stage: String,
        source: tokio::task::JoinError,
    },
}

/// Running pipeline
pub struct PipelineHandle {
    lines: mpsc::Sender<String>,
    stages: Vec<(String, JoinHandle<()>)>,
    metrics: Arc<PipelineMetrics>,
}

impl PipelineHandle {
    /// Sender for raw JSONL tick lines
    ///
    /// Every clone must be dropped before `shutdown` can complete.
    pub fn sender(&self) -> mpsc::Sender<String> {
        self.lines.clone()
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.metrics.clone()
    }

    /// Close the input and wait for every stage to drain
    pub async fn shutdown(self) -> Result<MetricsSnapshot, PipelineError> {
        let Self {
            lines,
            stages,
            metrics,
        } = self;
        drop(lines);

        for (stage, handle) in stages {
            handle
                .await
                .map_err(|source| PipelineError::Task { stage, source })?;
        }

        Ok(metrics.snapshot())
    }
}

/// Build and start every stage
///
/// Watermarks persisted by a previous run are restored into the shard that
/// owns each instrument before any tick is read.
pub fn spawn_pipeline(
    config: &PipelineConfig,
    viz: Box<dyn VizSink>,
    notifier: Arc<dyn Notifier>,
    store: CheckpointStore,
) -> Result<PipelineHandle, PipelineError> {
    config.validate()?;

    let metrics = Arc::new(PipelineMetrics::new());
    let restored = store.load_watermarks()?;
    let shard_count = config.worker_shards;

    log::info!("🚀 Spawning pipeline stages");
    log::info!("   ├─ Window shards: {}", shard_count);
    log::info!(
        "   ├─ Windows: fast {}s tumbling | slow {}s sliding every {}s",
        config.fast_window.as_secs(),
        config.slow_window.as_secs(),
        config.slow_hop.as_secs()
    );
    log::info!(
        "   ├─ Alerts: volume > {} and vwap outside ±{}σ band",
        config.alert_min_volume,
        config.band_k
    );
    log::info!("   └─ Restored watermarks: {} instruments", restored.len());

    let (line_tx, line_rx) = mpsc::channel::<String>(config.channel_buffer);
    let (fast_tx, fast_rx) = mpsc::channel(config.channel_buffer);
    let (slow_tx, slow_rx) = mpsc::channel(config.channel_buffer);
    let (joined_tx, joined_rx) = mpsc::channel(config.channel_buffer);

    let mut stages = Vec::new();

    let mut shard_senders = Vec::with_capacity(shard_count);
    let mut shard_handles = Vec::with_capacity(shard_count);
    for shard_id in 0..shard_count {
        let (tx, rx) = mpsc::channel(config.channel_buffer);
        shard_senders.push(tx);

        let mut engine = WindowEngine::new(config, metrics.clone());
        for (instrument, watermark_ms) in &restored {
            if shard_for(instrument, shard_count) == shard_id {
                engine.restore_watermark(instrument, *watermark_ms);
            }
        }

        shard_handles.push((
            format!("window-shard-{}", shard_id),
            tokio::spawn(run_window_shard(
                shard_id,
                engine,
                rx,
                fast_tx.clone(),
                slow_tx.clone(),
            )),
        ));
    }
    drop(fast_tx);
    drop(slow_tx);

    stages.push((
        "ingestion".to_string(),
        tokio::spawn(start_pipeline_ingestion(
            line_rx,
            shard_senders,
            metrics.clone(),
        )),
    ));
    stages.extend(shard_handles);

    stages.push((
        "join".to_string(),
        tokio::spawn(run_join_stage(
            fast_rx,
            slow_rx,
            joined_tx,
            AlertClassifier::new(config.alert_min_volume),
            metrics.clone(),
        )),
    ));

    let dispatcher = NotificationDispatcher::new(
        notifier,
        store.clone(),
        config.notify_concurrency,
        config.notify_max_retries,
        metrics.clone(),
    );
    let fanout = FanoutStage::new(viz, dispatcher, store, metrics.clone());
    stages.push((
        "fanout".to_string(),
        tokio::spawn(fanout.run(
            joined_rx,
            Duration::from_millis(config.checkpoint_interval_ms),
        )),
    ));

    Ok(PipelineHandle {
        lines: line_tx,
        stages,
        metrics,
    })
}

/// Log a metrics summary every `every` until the task is aborted
pub fn spawn_metrics_reporter(metrics: Arc<PipelineMetrics>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(every);
        // First tick completes immediately
        timer.tick().await;
        loop {
            timer.tick().await;
            metrics.snapshot().log_summary();
        }
    })
}
