//! Fault and throughput counters shared by all stages
//!
//! Every fault the pipeline absorbs instead of propagating (parse rejects,
//! late contributions, degenerate windows, sink failures) is counted here.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub ticks_received: AtomicU64,
    pub ticks_rejected: AtomicU64,
    pub late_contributions: AtomicU64,
    pub degenerate_windows: AtomicU64,
    pub fast_windows_closed: AtomicU64,
    pub slow_windows_closed: AtomicU64,
    pub partial_windows_discarded: AtomicU64,
    pub records_joined: AtomicU64,
    pub unmatched_summaries: AtomicU64,
    pub alerts_raised: AtomicU64,
    pub viz_failures: AtomicU64,
    pub notifications_sent: AtomicU64,
    pub notifications_failed: AtomicU64,
    pub notifications_suppressed: AtomicU64,
    pub checkpoints_written: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub ticks_received: u64,
    pub ticks_rejected: u64,
    pub late_contributions: u64,
    pub degenerate_windows: u64,
    pub fast_windows_closed: u64,
    pub slow_windows_closed: u64,
    pub partial_windows_discarded: u64,
    pub records_joined: u64,
    pub unmatched_summaries: u64,
    pub alerts_raised: u64,
    pub viz_failures: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub notifications_suppressed: u64,
    pub checkpoints_written: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            ticks_received: load(&self.ticks_received),
            ticks_rejected: load(&self.ticks_rejected),
            late_contributions: load(&self.late_contributions),
            degenerate_windows: load(&self.degenerate_windows),
            fast_windows_closed: load(&self.fast_windows_closed),
            slow_windows_closed: load(&self.slow_windows_closed),
            partial_windows_discarded: load(&self.partial_windows_discarded),
            records_joined: load(&self.records_joined),
            unmatched_summaries: load(&self.unmatched_summaries),
            alerts_raised: load(&self.alerts_raised),
            viz_failures: load(&self.viz_failures),
            notifications_sent: load(&self.notifications_sent),
            notifications_failed: load(&self.notifications_failed),
            notifications_suppressed: load(&self.notifications_suppressed),
            checkpoints_written: load(&self.checkpoints_written),
        }
    }
}

impl MetricsSnapshot {
    pub fn log_summary(&self) {
        log::info!("📊 Pipeline counters:");
        log::info!(
            "   ├─ ticks: {} received, {} rejected",
            self.ticks_received,
            self.ticks_rejected
        );
        log::info!(
            "   ├─ windows: {} fast, {} slow closed | {} degenerate | {} late contributions",
            self.fast_windows_closed,
            self.slow_windows_closed,
            self.degenerate_windows,
            self.late_contributions
        );
        log::info!(
            "   ├─ join: {} records, {} unmatched | {} alerts",
            self.records_joined,
            self.unmatched_summaries,
            self.alerts_raised
        );
        log::info!(
            "   └─ sinks: {} sent, {} failed, {} suppressed | {} viz failures | {} checkpoints",
            self.notifications_sent,
            self.notifications_failed,
            self.notifications_suppressed,
            self.viz_failures,
            self.checkpoints_written
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = PipelineMetrics::new();
        PipelineMetrics::incr(&metrics.ticks_received);
        PipelineMetrics::incr(&metrics.ticks_received);
        PipelineMetrics::add(&metrics.late_contributions, 5);
        PipelineMetrics::add(&metrics.degenerate_windows, 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.ticks_received, 2);
        assert_eq!(snapshot.late_contributions, 5);
        assert_eq!(snapshot.degenerate_windows, 0);
    }
}
