//! Keyed window aggregator with exactly-once closing
//!
//! Open windows live in an explicit `BTreeMap<window_end, accumulator>` per
//! instrument. Advancing an instrument's watermark splits off every window
//! ending at or before it, emits each one (or counts it as degenerate when it
//! carries no volume) and forgets it. The watermark doubles as the record of
//! what is closed, so a late contribution is recognised without keeping
//! closed accumulators around.

use super::types::{Tick, WindowKind, WindowSummary};
use super::windows::{WindowAccumulator, WindowSpec};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
struct OpenWindow {
    start_ms: i64,
    acc: WindowAccumulator,
}

#[derive(Debug, Clone, Default)]
struct InstrumentWindows {
    open: BTreeMap<i64, OpenWindow>,
    closed_through_ms: Option<i64>,
}

impl InstrumentWindows {
    fn is_closed(&self, window_end_ms: i64) -> bool {
        self.closed_through_ms.map_or(false, |wm| window_end_ms <= wm)
    }
}

/// Per-tick result of `ingest`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Windows the tick was folded into
    pub contributed: usize,
    /// Windows the tick belonged to that were already closed
    pub late: usize,
}

/// Result of advancing one instrument's watermark
#[derive(Debug, Clone, Default)]
pub struct CloseBatch {
    /// Closed windows in ascending `window_end` order
    pub summaries: Vec<WindowSummary>,
    /// Closed windows suppressed for zero volume
    pub degenerate: usize,
}

#[derive(Debug, Clone)]
pub struct WindowAggregator {
    kind: WindowKind,
    spec: WindowSpec,
    instruments: HashMap<String, InstrumentWindows>,
}

impl WindowAggregator {
    pub fn new(kind: WindowKind, spec: WindowSpec) -> Self {
        Self {
            kind,
            spec,
            instruments: HashMap::new(),
        }
    }

    /// Fold a tick into every still-open window covering its timestamp
    pub fn ingest(&mut self, tick: &Tick) -> IngestOutcome {
        let t_ms = tick.timestamp_ms();
        let state = self.instruments.entry(tick.ticker.clone()).or_default();
        let mut outcome = IngestOutcome::default();

        for (start_ms, end_ms) in self.spec.windows_containing(t_ms) {
            if state.is_closed(end_ms) {
                outcome.late += 1;
                continue;
            }

            state
                .open
                .entry(end_ms)
                .or_insert_with(|| OpenWindow {
                    start_ms,
                    acc: WindowAccumulator::new(),
                })
                .acc
                .add(tick.volume, tick.vwap);
            outcome.contributed += 1;
        }

        outcome
    }

    /// Close and emit every window of `instrument` ending at or before
    /// `watermark_ms`
    ///
    /// A watermark at or below the previous one is a no-op, so replaying the
    /// same advance never emits twice.
    pub fn advance_watermark(&mut self, instrument: &str, watermark_ms: i64) -> CloseBatch {
        let state = self.instruments.entry(instrument.to_string()).or_default();

        if state.is_closed(watermark_ms) {
            return CloseBatch::default();
        }
        state.closed_through_ms = Some(watermark_ms);

        let still_open = state.open.split_off(&watermark_ms.saturating_add(1));
        let closing = std::mem::replace(&mut state.open, still_open);

        let mut batch = CloseBatch::default();
        for (end_ms, window) in closing {
            match window
                .acc
                .summarize(instrument, self.kind, window.start_ms, end_ms)
            {
                Some(summary) => batch.summaries.push(summary),
                None => {
                    log::debug!(
                        "Suppressed zero-volume {} window {}@{}",
                        self.kind.as_str(),
                        instrument,
                        end_ms
                    );
                    batch.degenerate += 1;
                }
            }
        }

        batch
    }

    /// Discard all open windows without emitting them
    ///
    /// Returns how many partial windows were dropped.
    pub fn drain(&mut self) -> usize {
        let dropped = self.open_window_count();
        for state in self.instruments.values_mut() {
            state.open.clear();
        }
        dropped
    }

    pub fn open_window_count(&self) -> usize {
        self.instruments.values().map(|s| s.open.len()).sum()
    }

    pub fn open_windows_for(&self, instrument: &str) -> usize {
        self.instruments.get(instrument).map_or(0, |s| s.open.len())
    }

    pub fn closed_through(&self, instrument: &str) -> Option<i64> {
        self.instruments.get(instrument).and_then(|s| s.closed_through_ms)
    }
}
