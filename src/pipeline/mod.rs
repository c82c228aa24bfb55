//! Streaming VWAP / Bollinger breakout pipeline
//!
//! Architecture:
//! ```text
//! JSONL ticks → ingestion → window shards (watermark + 1m tumbling + 20m sliding + bands)
//!                                 ↓ fast / slow summaries
//!                           temporal join → classifier → fan-out (viz feed, notifier, checkpoint)
//! ```
//!
//! Each window closes exactly once, the first time its instrument's
//! watermark passes its end. Late contributions are counted and dropped.

pub mod aggregator;
pub mod bands;
pub mod checkpoint;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod fanout;
pub mod ingestion;
pub mod join;
pub mod metrics;
pub mod runtime;
pub mod types;
pub mod watermark;
pub mod windows;

pub use checkpoint::CheckpointStore;
pub use config::PipelineConfig;
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use runtime::{spawn_metrics_reporter, spawn_pipeline, PipelineError, PipelineHandle};
pub use types::{Action, AlertNotice, JoinedRecord, Tick, WindowKind, WindowSummary};
