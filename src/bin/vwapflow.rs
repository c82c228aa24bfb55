//! vwapflow - streaming VWAP / Bollinger breakout runtime
//!
//! Reads JSONL ticks, computes 1-minute VWAP and 20-minute Bollinger bands
//! per instrument, and raises breakout alerts.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin vwapflow            # follow TICK_SOURCE_PATH until CTRL+C
//! cargo run --release --bin vwapflow -- --once  # read the file once, then drain and exit
//! ```
//!
//! ## Environment Variables
//!
//! See `PipelineConfig::from_env` for the full list. Most used:
//! - TICK_SOURCE_PATH - JSONL tick file (default: streams/ticker/ticks.jsonl)
//! - VWAPFLOW_DB_PATH - SQLite checkpoint + alert ledger (default: data/vwapflow.db)
//! - VIZ_OUTPUT_PATH - Directory for joined.jsonl / alerts.jsonl (default: streams/viz)
//! - NOTIFY_WEBHOOK_URL / NOTIFY_TOKEN / NOTIFY_CHANNEL - Alert webhook (default: log only)
//! - RUST_LOG - Logging level (optional, default: info)

use dotenv::dotenv;
use log::{error, info, warn};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use vwapflow::pipeline::{spawn_metrics_reporter, spawn_pipeline, CheckpointStore, PipelineConfig};
use vwapflow::sink_core::{JsonlVizSink, LogNotifier, Notifier, WebhookNotifier};
use vwapflow::source_core::JsonlTickSource;

fn read_once_from_args() -> bool {
    env::args().any(|arg| arg == "--once")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let mut config = PipelineConfig::from_env()?;
    if read_once_from_args() {
        config.source_follow = false;
    }

    info!("🚀 vwapflow starting");
    info!("   ├─ Source: {} (follow: {})", config.source_path, config.source_follow);
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Viz output: {}", config.viz_output_path);
    info!("   ├─ Channel buffer: {}", config.channel_buffer);
    info!("   └─ Checkpoint interval: {}ms", config.checkpoint_interval_ms);

    let store = CheckpointStore::open(&config.db_path)?;

    let viz = JsonlVizSink::new(
        &config.viz_output_path,
        config.viz_max_size_mb,
        config.viz_max_rotations,
    )?;

    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => {
            info!("🔔 Notifier: webhook {}", url);
            Arc::new(WebhookNotifier::new(
                url.clone(),
                config.notify_token.clone(),
                config.notify_channel.clone(),
            )?)
        }
        None => {
            info!("🔔 Notifier: log only (set NOTIFY_WEBHOOK_URL to send alerts)");
            Arc::new(LogNotifier)
        }
    };

    let pipeline = spawn_pipeline(&config, Box::new(viz), notifier, store)?;
    let reporter = spawn_metrics_reporter(pipeline.metrics(), Duration::from_secs(60));

    let source = JsonlTickSource::new(&config.source_path, config.source_follow);
    let mut source_task = tokio::spawn(source.run(pipeline.sender()));

    info!("🔄 Press CTRL+C to shutdown gracefully");

    tokio::select! {
        result = &mut source_task => match result {
            Ok(Ok(lines)) => info!("✅ Source finished after {} lines", lines),
            Ok(Err(e)) => error!("❌ Tick source failed: {}", e),
            Err(e) => error!("❌ Tick source task panicked: {}", e),
        },
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => warn!("⚠️  Received CTRL+C, shutting down..."),
                Err(e) => error!("❌ Failed to listen for CTRL+C: {}", e),
            }
            source_task.abort();
            // Wait for the aborted task so its sender is dropped
            let _ = source_task.await;
        }
    }

    let snapshot = pipeline.shutdown().await?;
    reporter.abort();

    snapshot.log_summary();
    info!("✅ vwapflow stopped");
    Ok(())
}
