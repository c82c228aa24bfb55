//! Per-shard windowing engine
//!
//! Owns the watermark tracker, the fast (tumbling) and slow (sliding)
//! aggregators and the band calculator for every instrument routed to its
//! shard. Nothing here is shared, so no locks guard the accumulators.
//!
//! A watermark marker is forwarded only when the watermark crosses a window
//! boundary. Between boundaries no window can close, so the marker stream
//! stays small and the checkpointed value is still exact.

use super::aggregator::{CloseBatch, WindowAggregator};
use super::bands::BandCalculator;
use super::config::PipelineConfig;
use super::metrics::PipelineMetrics;
use super::types::{Flow, Tick, Watermark, WindowKind, WindowSummary};
use super::watermark::WatermarkTracker;
use super::windows::WindowSpec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Messages produced by one tick, per output stream
#[derive(Debug, Default)]
pub struct EngineOutput {
    pub fast: Vec<Flow<WindowSummary>>,
    pub slow: Vec<Flow<WindowSummary>>,
}

impl EngineOutput {
    pub fn is_empty(&self) -> bool {
        self.fast.is_empty() && self.slow.is_empty()
    }
}

pub struct WindowEngine {
    tracker: WatermarkTracker,
    fast: WindowAggregator,
    slow: WindowAggregator,
    bands: BandCalculator,
    hop_ms: i64,
    last_boundary: HashMap<String, i64>,
    metrics: Arc<PipelineMetrics>,
}

impl WindowEngine {
    pub fn new(config: &PipelineConfig, metrics: Arc<PipelineMetrics>) -> Self {
        let fast_spec = WindowSpec::tumbling(config.fast_window);
        let slow_spec = WindowSpec::sliding(config.slow_hop, config.slow_window);

        Self {
            tracker: WatermarkTracker::new(config.allowed_lateness_ms),
            fast: WindowAggregator::new(WindowKind::Fast, fast_spec),
            slow: WindowAggregator::new(WindowKind::Slow, slow_spec),
            bands: BandCalculator::new(config.band_k),
            hop_ms: slow_spec.hop_ms(),
            last_boundary: HashMap::new(),
            metrics,
        }
    }

    /// Largest window end at or before `watermark_ms`
    fn boundary(&self, watermark_ms: i64) -> i64 {
        watermark_ms.div_euclid(self.hop_ms) * self.hop_ms
    }

    /// Seed an instrument from a durable checkpoint
    ///
    /// Windows ending at or before the restored watermark count as closed, so
    /// replayed ticks for them are dropped as late.
    pub fn restore_watermark(&mut self, instrument: &str, watermark_ms: i64) {
        self.tracker.restore(instrument, watermark_ms);
        self.fast.advance_watermark(instrument, watermark_ms);
        self.slow.advance_watermark(instrument, watermark_ms);
        self.last_boundary
            .insert(instrument.to_string(), self.boundary(watermark_ms));
    }

    /// Fold one tick in and close whatever its watermark advance allows
    pub fn process_tick(&mut self, tick: &Tick) -> EngineOutput {
        let fast_in = self.fast.ingest(tick);
        let slow_in = self.slow.ingest(tick);
        let late = fast_in.late + slow_in.late;
        if late > 0 {
            log::debug!(
                "Late tick {}@{} dropped from {} closed windows",
                tick.ticker,
                tick.timestamp_ms(),
                late
            );
            PipelineMetrics::add(&self.metrics.late_contributions, late as u64);
        }

        let mut output = EngineOutput::default();

        let Some(watermark_ms) = self.tracker.observe(&tick.ticker, tick.timestamp_ms()) else {
            return output;
        };

        let boundary = self.boundary(watermark_ms);
        if self
            .last_boundary
            .get(&tick.ticker)
            .map_or(false, |last| boundary <= *last)
        {
            return output;
        }
        self.last_boundary.insert(tick.ticker.clone(), boundary);

        let fast_batch = self.fast.advance_watermark(&tick.ticker, watermark_ms);
        let slow_batch = self.slow.advance_watermark(&tick.ticker, watermark_ms);

        PipelineMetrics::add(
            &self.metrics.fast_windows_closed,
            fast_batch.summaries.len() as u64,
        );
        PipelineMetrics::add(
            &self.metrics.slow_windows_closed,
            slow_batch.summaries.len() as u64,
        );
        PipelineMetrics::add(
            &self.metrics.degenerate_windows,
            (fast_batch.degenerate + slow_batch.degenerate) as u64,
        );

        let marker = Watermark {
            instrument: tick.ticker.clone(),
            watermark_ms,
        };

        output.fast = Self::into_flow(fast_batch, marker.clone(), |s| s);
        output.slow = Self::into_flow(slow_batch, marker, |s| self.bands.apply(s));
        output
    }

    fn into_flow(
        batch: CloseBatch,
        marker: Watermark,
        mut map: impl FnMut(WindowSummary) -> WindowSummary,
    ) -> Vec<Flow<WindowSummary>> {
        let mut flow: Vec<_> = batch
            .summaries
            .into_iter()
            .map(|s| Flow::Item(map(s)))
            .collect();
        flow.push(Flow::Watermark(marker));
        flow
    }

    /// Discard every open window; returns how many were dropped
    pub fn drain(&mut self) -> usize {
        let dropped = self.fast.drain() + self.slow.drain();
        PipelineMetrics::add(&self.metrics.partial_windows_discarded, dropped as u64);
        dropped
    }

    pub fn instrument_count(&self) -> usize {
        self.tracker.instrument_count()
    }

    pub fn open_window_count(&self) -> usize {
        self.fast.open_window_count() + self.slow.open_window_count()
    }
}

/// Window stage task for one shard
///
/// Runs until the tick channel closes or both downstream channels are gone,
/// then discards the remaining partial windows.
pub async fn run_window_shard(
    shard_id: usize,
    mut engine: WindowEngine,
    mut rx: mpsc::Receiver<Tick>,
    fast_tx: mpsc::Sender<Flow<WindowSummary>>,
    slow_tx: mpsc::Sender<Flow<WindowSummary>>,
) {
    log::info!("🪟 Window shard {} started", shard_id);

    'ticks: while let Some(tick) = rx.recv().await {
        let output = engine.process_tick(&tick);
        if output.is_empty() {
            continue;
        }

        for msg in output.fast {
            if fast_tx.send(msg).await.is_err() {
                log::warn!("⚠️  Shard {}: fast window channel closed", shard_id);
                break 'ticks;
            }
        }
        for msg in output.slow {
            if slow_tx.send(msg).await.is_err() {
                log::warn!("⚠️  Shard {}: slow window channel closed", shard_id);
                break 'ticks;
            }
        }
    }

    let dropped = engine.drain();
    log::info!(
        "🛑 Window shard {} stopped ({} instruments, {} partial windows discarded)",
        shard_id,
        engine.instrument_count(),
        dropped
    );
}
