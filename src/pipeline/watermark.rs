//! Per-instrument event-time cursor gating window closure
//!
//! The watermark for an instrument is the highest event time seen for it,
//! minus the configured allowed lateness. It never moves backwards. Any
//! window whose end is at or before the watermark is closed for good.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default)]
struct KeyCursor {
    max_event_ms: Option<i64>,
    watermark_ms: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct WatermarkTracker {
    allowed_lateness_ms: i64,
    cursors: HashMap<String, KeyCursor>,
}

impl WatermarkTracker {
    pub fn new(allowed_lateness_ms: i64) -> Self {
        Self {
            allowed_lateness_ms: allowed_lateness_ms.max(0),
            cursors: HashMap::new(),
        }
    }

    /// Record an event time; returns the new watermark if it advanced
    pub fn observe(&mut self, instrument: &str, event_ms: i64) -> Option<i64> {
        let cursor = self.cursors.entry(instrument.to_string()).or_default();

        let max_event = cursor.max_event_ms.map_or(event_ms, |m| m.max(event_ms));
        cursor.max_event_ms = Some(max_event);

        let candidate = max_event - self.allowed_lateness_ms;
        match cursor.watermark_ms {
            Some(current) if candidate <= current => None,
            _ => {
                cursor.watermark_ms = Some(candidate);
                Some(candidate)
            }
        }
    }

    /// Seed a watermark from a durable checkpoint
    ///
    /// Never lowers a watermark already known in memory.
    pub fn restore(&mut self, instrument: &str, watermark_ms: i64) {
        let cursor = self.cursors.entry(instrument.to_string()).or_default();
        let restored = cursor.watermark_ms.map_or(watermark_ms, |w| w.max(watermark_ms));
        cursor.watermark_ms = Some(restored);
    }

    pub fn watermark(&self, instrument: &str) -> Option<i64> {
        self.cursors.get(instrument).and_then(|c| c.watermark_ms)
    }

    /// True when a window ending at `window_end_ms` can no longer change
    pub fn is_closed(&self, instrument: &str, window_end_ms: i64) -> bool {
        self.watermark(instrument)
            .map_or(false, |wm| window_end_ms <= wm)
    }

    pub fn instrument_count(&self) -> usize {
        self.cursors.len()
    }
}
