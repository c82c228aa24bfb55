//! vwapflow-replay - feed a historical tick archive into the live source file
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin vwapflow-replay
//! cargo run --release --bin vwapflow-replay -- data/other.jsonl
//! ```
//!
//! ## Environment Variables
//!
//! - REPLAY_ARCHIVE_PATH - JSONL archive to replay (default: data/ticker.jsonl)
//! - REPLAY_RATE - Ticks per second (default: 1000)
//! - TICK_SOURCE_PATH - File the runtime follows (default: streams/ticker/ticks.jsonl)

use dotenv::dotenv;
use log::info;
use std::env;
use vwapflow::pipeline::PipelineConfig;
use vwapflow::source_core::ReplayProducer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = PipelineConfig::from_env()?;
    let archive = env::args()
        .nth(1)
        .unwrap_or_else(|| config.replay_archive_path.clone());

    info!("⏯️  Replay");
    info!("   ├─ Archive: {}", archive);
    info!("   ├─ Target: {}", config.source_path);
    info!("   └─ Rate: {} ticks/sec", config.replay_rate);

    let stats = ReplayProducer::new(&archive, config.replay_rate)
        .run_into_file(&config.source_path)
        .await?;

    info!(
        "✅ Replayed {} ticks ({} skipped)",
        stats.written, stats.skipped
    );
    Ok(())
}
