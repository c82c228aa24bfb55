//! Window geometry and incremental accumulators
//!
//! Windows are half-open `[start, end)` intervals aligned to the Unix epoch:
//! every window start is a multiple of the hop. A tumbling window is the
//! special case `hop == duration`.

use super::types::{millis_to_utc, WindowKind, WindowSummary};
use std::time::Duration;

/// Shape of a window family (duration and hop, both in milliseconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    duration_ms: i64,
    hop_ms: i64,
}

impl WindowSpec {
    /// Non-overlapping windows of the given length
    pub fn tumbling(duration: Duration) -> Self {
        let ms = duration.as_millis() as i64;
        Self {
            duration_ms: ms,
            hop_ms: ms,
        }
    }

    /// Overlapping windows of length `duration` advancing by `hop`
    pub fn sliding(hop: Duration, duration: Duration) -> Self {
        Self {
            duration_ms: duration.as_millis() as i64,
            hop_ms: hop.as_millis() as i64,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        self.duration_ms
    }

    pub fn hop_ms(&self) -> i64 {
        self.hop_ms
    }

    /// Maximum number of windows that can cover a single instant
    pub fn max_overlap(&self) -> usize {
        ((self.duration_ms + self.hop_ms - 1) / self.hop_ms) as usize
    }

    /// Every `(start_ms, end_ms)` window whose interval contains `t_ms`,
    /// latest start first
    pub fn windows_containing(&self, t_ms: i64) -> impl Iterator<Item = (i64, i64)> {
        let hop = self.hop_ms;
        let duration = self.duration_ms;
        let last_start = t_ms.div_euclid(hop) * hop;

        (0..)
            .map(move |i: i64| last_start - i * hop)
            .take_while(move |start| start + duration > t_ms)
            .map(move |start| (start, start + duration))
    }
}

/// Running sums for one open window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowAccumulator {
    volume: f64,
    volume_vwap: f64,
    volume_vwap_sq: f64,
    tick_count: u64,
}

impl WindowAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one tick's contribution into the sums
    pub fn add(&mut self, volume: f64, vwap: f64) {
        self.volume += volume;
        self.volume_vwap += volume * vwap;
        self.volume_vwap_sq += volume * vwap * vwap;
        self.tick_count += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.tick_count == 0
    }

    pub fn len(&self) -> u64 {
        self.tick_count
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Freeze the sums into a summary
    ///
    /// Returns None when the window carries no volume or its sums overflowed:
    /// either way the VWAP is undefined and must not leak downstream as NaN.
    pub fn summarize(
        &self,
        instrument: &str,
        kind: WindowKind,
        start_ms: i64,
        end_ms: i64,
    ) -> Option<WindowSummary> {
        if !(self.volume > 0.0) {
            return None;
        }

        let vwap = self.volume_vwap / self.volume;
        let vwap_second_moment = self.volume_vwap_sq / self.volume;

        let sums = [self.volume, self.volume_vwap, self.volume_vwap_sq];
        if !sums.iter().chain([&vwap, &vwap_second_moment]).all(|v| v.is_finite()) {
            return None;
        }

        Some(WindowSummary {
            instrument: instrument.to_string(),
            kind,
            window_start: millis_to_utc(start_ms)?,
            window_end: millis_to_utc(end_ms)?,
            volume: self.volume,
            vwap,
            vwap_second_moment,
            tick_count: self.tick_count,
            band: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: i64 = 60_000;

    #[test]
    fn test_tumbling_assigns_exactly_one_window() {
        let spec = WindowSpec::tumbling(Duration::from_secs(60));

        let windows: Vec<_> = spec.windows_containing(90_000).collect();
        assert_eq!(windows, vec![(60_000, 120_000)]);

        // Boundary instants belong to the window that starts there
        let windows: Vec<_> = spec.windows_containing(120_000).collect();
        assert_eq!(windows, vec![(120_000, 180_000)]);
    }

    #[test]
    fn test_sliding_assigns_twenty_windows() {
        let spec = WindowSpec::sliding(Duration::from_secs(60), Duration::from_secs(1200));
        let t = 100 * MINUTE + 30_000;

        let windows: Vec<_> = spec.windows_containing(t).collect();
        assert_eq!(windows.len(), 20);
        assert_eq!(spec.max_overlap(), 20);
        assert!(windows.iter().all(|(s, e)| *s <= t && t < *e));
        assert_eq!(windows.first(), Some(&(100 * MINUTE, 120 * MINUTE)));
        assert_eq!(windows.last(), Some(&(81 * MINUTE, 101 * MINUTE)));
    }

    #[test]
    fn test_negative_timestamps_align_to_epoch() {
        let spec = WindowSpec::tumbling(Duration::from_secs(60));
        let windows: Vec<_> = spec.windows_containing(-1).collect();
        assert_eq!(windows, vec![(-MINUTE, 0)]);
    }

    #[test]
    fn test_accumulator_weighted_moments() {
        let mut acc = WindowAccumulator::new();
        acc.add(100.0, 10.0);
        acc.add(300.0, 20.0);

        let summary = acc.summarize("AAPL", WindowKind::Slow, 0, 1_200_000).unwrap();
        assert_eq!(summary.volume, 400.0);
        assert!((summary.vwap - 17.5).abs() < 1e-12);
        // (100·100 + 300·400) / 400
        assert!((summary.vwap_second_moment - 325.0).abs() < 1e-12);
        assert_eq!(summary.tick_count, 2);
        assert!(summary.band.is_none());
    }

    #[test]
    fn test_zero_volume_has_no_summary() {
        let mut acc = WindowAccumulator::new();
        acc.add(0.0, 10.0);

        assert!(!acc.is_empty());
        assert!(acc.summarize("AAPL", WindowKind::Fast, 0, MINUTE).is_none());
    }

    #[test]
    fn test_overflowing_sums_have_no_summary() {
        // Each tick is finite on its own; the running volume is not
        let mut acc = WindowAccumulator::new();
        acc.add(1e308, 100.0);
        acc.add(1e308, 100.0);
        assert!(acc.summarize("AAPL", WindowKind::Fast, 0, MINUTE).is_none());

        // Finite volume, but volume·vwap² overflows
        let mut acc = WindowAccumulator::new();
        acc.add(1e300, 1e10);
        assert!(acc.summarize("AAPL", WindowKind::Slow, 0, MINUTE).is_none());
    }
}
