//! Equality join of fast and slow summaries on (instrument, window_end)
//!
//! Both window families share the same hop, so every slow window end is also
//! a fast window end and the join needs no tolerance. Each side is buffered
//! until its partner arrives. Watermarks from both inputs are tracked per
//! instrument; once both have passed a window end, an unmatched entry can no
//! longer find its partner and is evicted without output.

use super::classifier::AlertClassifier;
use super::metrics::PipelineMetrics;
use super::types::{Flow, JoinedRecord, Watermark, WindowKind, WindowSummary};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Fast-window stats paired with the slow-window band for the same instant
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedStats {
    pub instrument: String,
    pub t: DateTime<Utc>,
    pub volume: f64,
    pub vwap: f64,
    pub bollinger_upper: f64,
    pub bollinger_lower: f64,
}

impl JoinedStats {
    /// Pair a fast summary with a banded slow summary
    ///
    /// Returns None if the slow summary was never banded.
    pub fn from_pair(fast: &WindowSummary, slow: &WindowSummary) -> Option<Self> {
        let band = slow.band?;
        Some(Self {
            instrument: fast.instrument.clone(),
            t: fast.window_end,
            volume: fast.volume,
            vwap: fast.vwap,
            bollinger_upper: band.upper,
            bollinger_lower: band.lower,
        })
    }
}

#[derive(Debug, Default)]
struct PendingSides {
    fast: BTreeMap<i64, WindowSummary>,
    slow: BTreeMap<i64, WindowSummary>,
    fast_watermark_ms: Option<i64>,
    slow_watermark_ms: Option<i64>,
    forwarded_ms: Option<i64>,
}

impl PendingSides {
    fn combined_watermark(&self) -> Option<i64> {
        Some(self.fast_watermark_ms?.min(self.slow_watermark_ms?))
    }
}

/// Outcome of feeding a watermark into the join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinAdvance {
    /// Combined watermark (min of both inputs) to forward downstream
    pub watermark_ms: i64,
    /// Buffered entries dropped because their partner can no longer arrive
    pub unmatched: usize,
}

#[derive(Debug, Default)]
pub struct TemporalJoin {
    pending: HashMap<String, PendingSides>,
}

impl TemporalJoin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer one summary; returns the joined stats when its partner is
    /// already buffered
    pub fn push(&mut self, summary: WindowSummary) -> Option<JoinedStats> {
        let end_ms = summary.window_end_ms();
        let sides = self.pending.entry(summary.instrument.clone()).or_default();

        match summary.kind {
            WindowKind::Fast => match sides.slow.remove(&end_ms) {
                Some(slow) => JoinedStats::from_pair(&summary, &slow),
                None => {
                    sides.fast.insert(end_ms, summary);
                    None
                }
            },
            WindowKind::Slow => match sides.fast.remove(&end_ms) {
                Some(fast) => JoinedStats::from_pair(&fast, &summary),
                None => {
                    sides.slow.insert(end_ms, summary);
                    None
                }
            },
        }
    }

    /// Record an input watermark
    ///
    /// Returns the combined watermark when it advanced, after evicting every
    /// buffered entry at or below it.
    pub fn advance(
        &mut self,
        kind: WindowKind,
        instrument: &str,
        watermark_ms: i64,
    ) -> Option<JoinAdvance> {
        let sides = self.pending.entry(instrument.to_string()).or_default();

        let slot = match kind {
            WindowKind::Fast => &mut sides.fast_watermark_ms,
            WindowKind::Slow => &mut sides.slow_watermark_ms,
        };
        *slot = Some(slot.map_or(watermark_ms, |w| w.max(watermark_ms)));

        let combined = sides.combined_watermark()?;
        if sides.forwarded_ms.map_or(false, |f| combined <= f) {
            return None;
        }
        sides.forwarded_ms = Some(combined);

        let keep_from = combined.saturating_add(1);
        let fast_keep = sides.fast.split_off(&keep_from);
        let slow_keep = sides.slow.split_off(&keep_from);
        let unmatched = sides.fast.len() + sides.slow.len();
        sides.fast = fast_keep;
        sides.slow = slow_keep;

        if unmatched > 0 {
            log::debug!(
                "Join evicted {} unmatched summaries for {} through {}",
                unmatched,
                instrument,
                combined
            );
        }

        Some(JoinAdvance {
            watermark_ms: combined,
            unmatched,
        })
    }

    pub fn pending_len(&self) -> usize {
        self.pending
            .values()
            .map(|s| s.fast.len() + s.slow.len())
            .sum()
    }
}

/// Join stage task
///
/// Consumes both summary streams (fed by every window shard), classifies each
/// joined pair and forwards records followed by the combined watermark. A
/// record is always sent before the marker that covers it.
pub async fn run_join_stage(
    mut fast_rx: mpsc::Receiver<Flow<WindowSummary>>,
    mut slow_rx: mpsc::Receiver<Flow<WindowSummary>>,
    out_tx: mpsc::Sender<Flow<JoinedRecord>>,
    classifier: AlertClassifier,
    metrics: Arc<PipelineMetrics>,
) {
    log::info!("🔗 Join stage started");

    let mut join = TemporalJoin::new();
    let mut fast_open = true;
    let mut slow_open = true;

    while fast_open || slow_open {
        let (kind, msg) = tokio::select! {
            msg = fast_rx.recv(), if fast_open => match msg {
                Some(msg) => (WindowKind::Fast, msg),
                None => {
                    fast_open = false;
                    continue;
                }
            },
            msg = slow_rx.recv(), if slow_open => match msg {
                Some(msg) => (WindowKind::Slow, msg),
                None => {
                    slow_open = false;
                    continue;
                }
            },
        };

        let out = match msg {
            Flow::Item(summary) => match join.push(summary) {
                Some(stats) => {
                    PipelineMetrics::incr(&metrics.records_joined);
                    Flow::Item(classifier.classify(stats))
                }
                None => continue,
            },
            Flow::Watermark(marker) => {
                match join.advance(kind, &marker.instrument, marker.watermark_ms) {
                    Some(advance) => {
                        PipelineMetrics::add(&metrics.unmatched_summaries, advance.unmatched as u64);
                        Flow::Watermark(Watermark {
                            instrument: marker.instrument,
                            watermark_ms: advance.watermark_ms,
                        })
                    }
                    None => continue,
                }
            }
        };

        if out_tx.send(out).await.is_err() {
            log::warn!("⚠️  Joined record channel closed, stopping join stage");
            break;
        }
    }

    log::info!(
        "🛑 Join stage stopped ({} summaries still unmatched)",
        join.pending_len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::bands::Band;
    use crate::pipeline::types::millis_to_utc;

    const MINUTE: i64 = 60_000;

    fn summary(kind: WindowKind, instrument: &str, end_ms: i64, vwap: f64) -> WindowSummary {
        let band = match kind {
            WindowKind::Fast => None,
            WindowKind::Slow => Some(Band {
                vwstd: 2.5,
                upper: 100.0,
                lower: 90.0,
            }),
        };
        WindowSummary {
            instrument: instrument.to_string(),
            kind,
            window_start: millis_to_utc(end_ms - MINUTE).unwrap(),
            window_end: millis_to_utc(end_ms).unwrap(),
            volume: 15_000.0,
            vwap,
            vwap_second_moment: vwap * vwap,
            tick_count: 3,
            band,
        }
    }

    #[test]
    fn test_joins_when_both_sides_present_in_either_order() {
        let mut join = TemporalJoin::new();

        assert!(join.push(summary(WindowKind::Fast, "AAPL", MINUTE, 105.0)).is_none());
        let joined = join
            .push(summary(WindowKind::Slow, "AAPL", MINUTE, 95.0))
            .unwrap();
        assert_eq!(joined.vwap, 105.0);
        assert_eq!(joined.volume, 15_000.0);
        assert_eq!(joined.bollinger_upper, 100.0);
        assert_eq!(joined.bollinger_lower, 90.0);

        assert!(join.push(summary(WindowKind::Slow, "AAPL", 2 * MINUTE, 95.0)).is_none());
        assert!(join.push(summary(WindowKind::Fast, "AAPL", 2 * MINUTE, 96.0)).is_some());
        assert_eq!(join.pending_len(), 0);
    }

    #[test]
    fn test_key_mismatch_never_joins() {
        let mut join = TemporalJoin::new();

        join.push(summary(WindowKind::Fast, "AAPL", MINUTE, 105.0));
        assert!(join.push(summary(WindowKind::Slow, "MSFT", MINUTE, 95.0)).is_none());
        assert!(join.push(summary(WindowKind::Slow, "AAPL", 2 * MINUTE, 95.0)).is_none());
        assert_eq!(join.pending_len(), 3);
    }

    #[test]
    fn test_unmatched_side_evicted_once_both_watermarks_pass() {
        let mut join = TemporalJoin::new();
        join.push(summary(WindowKind::Slow, "AAPL", MINUTE, 95.0));

        // Only one side has advanced: nothing forwarded, nothing evicted
        assert_eq!(join.advance(WindowKind::Slow, "AAPL", MINUTE), None);
        assert_eq!(join.pending_len(), 1);

        let advance = join.advance(WindowKind::Fast, "AAPL", 2 * MINUTE).unwrap();
        assert_eq!(advance, JoinAdvance { watermark_ms: MINUTE, unmatched: 1 });
        assert_eq!(join.pending_len(), 0);

        // A repeated watermark forwards nothing
        assert_eq!(join.advance(WindowKind::Slow, "AAPL", MINUTE), None);
    }

    #[test]
    fn test_slow_without_band_does_not_join() {
        let mut join = TemporalJoin::new();
        let mut slow = summary(WindowKind::Slow, "AAPL", MINUTE, 95.0);
        slow.band = None;

        join.push(slow);
        assert!(join.push(summary(WindowKind::Fast, "AAPL", MINUTE, 105.0)).is_none());
    }

    #[tokio::test]
    async fn test_join_stage_classifies_and_forwards_combined_watermark() {
        let metrics = Arc::new(PipelineMetrics::new());
        let (fast_tx, fast_rx) = mpsc::channel(16);
        let (slow_tx, slow_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);

        let handle = tokio::spawn(run_join_stage(
            fast_rx,
            slow_rx,
            out_tx,
            AlertClassifier::with_defaults(),
            metrics.clone(),
        ));

        let marker = Watermark {
            instrument: "AAPL".to_string(),
            watermark_ms: MINUTE,
        };
        fast_tx
            .send(Flow::Item(summary(WindowKind::Fast, "AAPL", MINUTE, 105.0)))
            .await
            .unwrap();
        fast_tx.send(Flow::Watermark(marker.clone())).await.unwrap();
        slow_tx
            .send(Flow::Item(summary(WindowKind::Slow, "AAPL", MINUTE, 95.0)))
            .await
            .unwrap();
        slow_tx.send(Flow::Watermark(marker.clone())).await.unwrap();
        drop(fast_tx);
        drop(slow_tx);
        handle.await.unwrap();

        match out_rx.recv().await {
            Some(Flow::Item(record)) => {
                assert!(record.is_alert);
                assert_eq!(record.action, crate::pipeline::types::Action::Sell);
            }
            other => panic!("expected joined record, got {:?}", other),
        }
        assert_eq!(out_rx.recv().await, Some(Flow::Watermark(marker)));
        assert_eq!(out_rx.recv().await, None);
        assert_eq!(metrics.snapshot().records_joined, 1);
    }
}
