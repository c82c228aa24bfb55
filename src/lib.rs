//! vwapflow - streaming VWAP / Bollinger band breakout engine
//!
//! ```text
//! source_core  → raw JSONL ticks (file, tail, replay)
//! pipeline     → watermarks, windows, bands, join, classification, checkpoints
//! sink_core    → visualization feed + alert notifications
//! ```

pub mod pipeline;
pub mod sink_core;
pub mod source_core;
