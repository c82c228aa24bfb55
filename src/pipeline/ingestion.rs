//! Pipeline ingestion - parse raw tick lines and route them to window shards
//!
//! Every instrument hashes to exactly one shard, so a shard is the single
//! writer for all of its instruments' windows.

use super::metrics::PipelineMetrics;
use super::types::Tick;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Shard index owning `instrument`
pub fn shard_for(instrument: &str, shards: usize) -> usize {
    if shards <= 1 {
        return 0;
    }
    let mut hasher = DefaultHasher::new();
    instrument.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

/// Route parsed ticks from the raw line channel to the shard channels
///
/// Malformed lines are rejected and counted; they never stop the stream.
/// Sending blocks while a shard is full, which pushes back on the source.
///
/// Runs until the line channel closes or every shard is gone. Dropping the
/// shard senders on return lets the window stage drain.
pub async fn start_pipeline_ingestion(
    mut rx: mpsc::Receiver<String>,
    shards: Vec<mpsc::Sender<Tick>>,
    metrics: Arc<PipelineMetrics>,
) {
    log::info!("🚀 Starting pipeline ingestion");
    log::info!("   └─ Routing to {} window shards", shards.len());

    let mut tick_count = 0u64;
    let mut last_log_time = std::time::Instant::now();

    while let Some(line) = rx.recv().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        PipelineMetrics::incr(&metrics.ticks_received);

        let tick = match Tick::from_jsonl(line) {
            Ok(tick) => tick,
            Err(e) => {
                PipelineMetrics::incr(&metrics.ticks_rejected);
                log::warn!("⚠️  Rejected tick: {}", e);
                continue;
            }
        };

        let shard = shard_for(&tick.ticker, shards.len());
        if shards[shard].send(tick).await.is_err() {
            log::error!("❌ Window shard {} closed, stopping ingestion", shard);
            break;
        }

        tick_count += 1;

        if last_log_time.elapsed().as_secs() >= 10 {
            let ticks_per_sec = tick_count as f64 / last_log_time.elapsed().as_secs_f64();
            log::info!(
                "📊 Ingestion rate: {:.1} ticks/sec (rejected total: {})",
                ticks_per_sec,
                metrics.snapshot().ticks_rejected
            );
            last_log_time = std::time::Instant::now();
            tick_count = 0;
        }
    }

    log::info!("✅ Pipeline ingestion stopped");
}
