//! Core data types flowing through the pipeline
//!
//! ```text
//! RawTick (wire JSON) → Tick → WindowSummary (fast | slow) → JoinedRecord → AlertNotice
//! ```

use super::bands::Band;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Tick exactly as it arrives on the wire (one JSON object per line)
///
/// `t` is a Unix timestamp in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTick {
    pub ticker: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub vwap: f64,
    pub t: i64,
    #[serde(default)]
    pub transactions: i64,
    #[serde(default)]
    pub otc: Option<String>,
}

/// Reasons a wire message is rejected before it reaches the windows
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("malformed tick json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("tick has an empty ticker")]
    EmptyTicker,

    #[error("tick field `{field}` is not finite: {value}")]
    NonFinite { field: &'static str, value: f64 },

    #[error("tick volume is negative: {0}")]
    NegativeVolume(f64),

    #[error("tick timestamp out of range: {0}ms")]
    Timestamp(i64),
}

/// Validated, immutable trade tick
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub ticker: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub vwap: f64,
    pub t: DateTime<Utc>,
    pub transactions: i64,
    pub otc: String,
}

impl Tick {
    /// Parse and validate a tick from a JSONL line
    pub fn from_jsonl(line: &str) -> Result<Self, SchemaError> {
        let raw: RawTick = serde_json::from_str(line)?;
        Tick::try_from(raw)
    }

    /// Event time in Unix milliseconds (the unit all window math uses)
    pub fn timestamp_ms(&self) -> i64 {
        self.t.timestamp_millis()
    }
}

impl TryFrom<RawTick> for Tick {
    type Error = SchemaError;

    fn try_from(raw: RawTick) -> Result<Self, Self::Error> {
        if raw.ticker.trim().is_empty() {
            return Err(SchemaError::EmptyTicker);
        }

        for (field, value) in [("volume", raw.volume), ("vwap", raw.vwap)] {
            if !value.is_finite() {
                return Err(SchemaError::NonFinite { field, value });
            }
        }

        if raw.volume < 0.0 {
            return Err(SchemaError::NegativeVolume(raw.volume));
        }

        let weighted_sq = raw.volume * raw.vwap * raw.vwap;
        if !weighted_sq.is_finite() {
            return Err(SchemaError::NonFinite {
                field: "volume*vwap^2",
                value: weighted_sq,
            });
        }

        let t = millis_to_utc(raw.t).ok_or(SchemaError::Timestamp(raw.t))?;

        Ok(Tick {
            ticker: raw.ticker,
            open: raw.open,
            high: raw.high,
            low: raw.low,
            close: raw.close,
            volume: raw.volume,
            vwap: raw.vwap,
            t,
            transactions: raw.transactions,
            otc: raw.otc.unwrap_or_default(),
        })
    }
}

/// Convert Unix milliseconds to a UTC instant
pub fn millis_to_utc(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Which of the two window families produced a summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    /// 1-minute tumbling window
    Fast,
    /// 20-minute window sliding by 1 minute
    Slow,
}

impl WindowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowKind::Fast => "fast",
            WindowKind::Slow => "slow",
        }
    }
}

/// Immutable snapshot of a closed window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSummary {
    pub instrument: String,
    pub kind: WindowKind,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub volume: f64,
    pub vwap: f64,
    /// Volume-weighted mean of vwap², i.e. Σ(volume·vwap²)/Σvolume
    pub vwap_second_moment: f64,
    pub tick_count: u64,
    /// Populated for slow windows by the band calculator
    pub band: Option<Band>,
}

impl WindowSummary {
    pub fn window_end_ms(&self) -> i64 {
        self.window_end.timestamp_millis()
    }
}

/// Trading action attached to every joined record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
    Hodl,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "buy",
            Action::Sell => "sell",
            Action::Hodl => "hodl",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 1-minute stats paired with the 20-minute band ending at the same instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedRecord {
    #[serde(rename = "ticker")]
    pub instrument: String,
    pub t: DateTime<Utc>,
    pub volume: f64,
    pub vwap: f64,
    pub bollinger_upper: f64,
    pub bollinger_lower: f64,
    pub is_alert: bool,
    pub action: Action,
}

/// Alert-only projection of a joined record, delivered to notifiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertNotice {
    #[serde(rename = "ticker")]
    pub instrument: String,
    pub t: DateTime<Utc>,
    pub vwap: f64,
    pub action: Action,
}

impl AlertNotice {
    /// Returns None for non-alert records
    pub fn from_record(record: &JoinedRecord) -> Option<Self> {
        if !record.is_alert {
            return None;
        }
        Some(Self {
            instrument: record.instrument.clone(),
            t: record.t,
            vwap: record.vwap,
            action: record.action,
        })
    }

    pub fn window_end_ms(&self) -> i64 {
        self.t.timestamp_millis()
    }

    /// Stable key for one logical alert: `{instrument}:{window_end_ms}`
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.instrument, self.window_end_ms())
    }

    /// Human-readable notification text
    pub fn message(&self) -> String {
        format!("Please {} {}", self.action, self.instrument)
    }
}

/// Per-instrument watermark marker travelling alongside data items
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watermark {
    pub instrument: String,
    pub watermark_ms: i64,
}

/// Message on an inter-stage channel: a data item or a watermark barrier
#[derive(Debug, Clone, PartialEq)]
pub enum Flow<T> {
    Item(T),
    Watermark(Watermark),
}
