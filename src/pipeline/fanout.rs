//! Sink fan-out stage
//!
//! Every joined record goes to the visualization feed; alert records are
//! also projected onto the alert sub-stream and handed to the notification
//! dispatcher. Watermark markers arriving behind the records are collected
//! and flushed to the checkpoint store on an interval, so a persisted
//! watermark never runs ahead of the records (and alert claims) before it.

use super::checkpoint::CheckpointStore;
use super::metrics::PipelineMetrics;
use super::types::{AlertNotice, Flow, JoinedRecord};
use crate::sink_core::dispatcher::NotificationDispatcher;
use crate::sink_core::viz::VizSink;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

pub struct FanoutStage {
    viz: Box<dyn VizSink>,
    dispatcher: NotificationDispatcher,
    store: CheckpointStore,
    pending_watermarks: HashMap<String, i64>,
    metrics: Arc<PipelineMetrics>,
}

impl FanoutStage {
    pub fn new(
        viz: Box<dyn VizSink>,
        dispatcher: NotificationDispatcher,
        store: CheckpointStore,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            viz,
            dispatcher,
            store,
            pending_watermarks: HashMap::new(),
            metrics,
        }
    }

    async fn handle_record(&mut self, record: JoinedRecord) {
        if let Err(e) = self.viz.write_record(&record).await {
            PipelineMetrics::incr(&self.metrics.viz_failures);
            log::warn!("⚠️  {} viz write failed: {}", self.viz.backend_type(), e);
        }

        let Some(alert) = AlertNotice::from_record(&record) else {
            return;
        };
        PipelineMetrics::incr(&self.metrics.alerts_raised);
        log::info!(
            "🚨 {} {} | vwap {:.4} outside [{:.4}, {:.4}] | volume {:.0}",
            alert.action,
            alert.instrument,
            record.vwap,
            record.bollinger_lower,
            record.bollinger_upper,
            record.volume
        );

        if let Err(e) = self.viz.write_alert(&alert).await {
            PipelineMetrics::incr(&self.metrics.viz_failures);
            log::warn!("⚠️  {} alert write failed: {}", self.viz.backend_type(), e);
        }

        if let Err(e) = self.dispatcher.dispatch(alert).await {
            PipelineMetrics::incr(&self.metrics.notifications_failed);
            log::error!("❌ Failed to claim alert in ledger: {}", e);
        }
    }

    fn record_watermark(&mut self, instrument: String, watermark_ms: i64) {
        let slot = self.pending_watermarks.entry(instrument).or_insert(watermark_ms);
        *slot = (*slot).max(watermark_ms);
    }

    /// Persist collected watermarks and flush the viz feed
    async fn checkpoint(&mut self) {
        if let Err(e) = self.viz.flush().await {
            PipelineMetrics::incr(&self.metrics.viz_failures);
            log::warn!("⚠️  {} viz flush failed: {}", self.viz.backend_type(), e);
        }

        if self.pending_watermarks.is_empty() {
            return;
        }

        match self.store.save_watermarks(&self.pending_watermarks) {
            Ok(count) => {
                PipelineMetrics::incr(&self.metrics.checkpoints_written);
                log::debug!("💾 Checkpointed {} watermarks", count);
                self.pending_watermarks.clear();
            }
            Err(e) => {
                // Kept for the next interval
                log::error!("❌ Checkpoint write failed: {}", e);
            }
        }
    }

    /// Run until the joined record channel closes
    ///
    /// On close: waits for in-flight notifications, then writes the final
    /// checkpoint.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Flow<JoinedRecord>>, checkpoint_every: Duration) {
        log::info!(
            "📤 Fan-out stage started (viz: {}, checkpoint every {}ms)",
            self.viz.backend_type(),
            checkpoint_every.as_millis()
        );

        let mut timer = interval(checkpoint_every.max(Duration::from_millis(1)));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(Flow::Item(record)) => self.handle_record(record).await,
                    Some(Flow::Watermark(marker)) => {
                        self.record_watermark(marker.instrument, marker.watermark_ms)
                    }
                    None => break,
                },
                _ = timer.tick() => self.checkpoint().await,
            }
        }

        log::info!("🔄 Joined stream closed, finishing fan-out...");
        self.dispatcher.shutdown().await;
        self.checkpoint().await;

        log::info!("✅ Fan-out stage stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::checkpoint::DeliveryStatus;
    use crate::pipeline::types::{millis_to_utc, Action, Watermark};
    use crate::sink_core::notifier::LogNotifier;
    use crate::sink_core::viz::{ChannelVizSink, VizEvent};

    fn record(end_ms: i64, vwap: f64, is_alert: bool, action: Action) -> JoinedRecord {
        JoinedRecord {
            instrument: "AAPL".to_string(),
            t: millis_to_utc(end_ms).unwrap(),
            volume: 15_000.0,
            vwap,
            bollinger_upper: 100.0,
            bollinger_lower: 90.0,
            is_alert,
            action,
        }
    }

    #[tokio::test]
    async fn test_fanout_routes_records_alerts_and_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path().join("state.db")).unwrap();
        let metrics = Arc::new(PipelineMetrics::new());
        let dispatcher = NotificationDispatcher::new(
            Arc::new(LogNotifier),
            store.clone(),
            4,
            3,
            metrics.clone(),
        );
        let (viz, mut viz_rx) = ChannelVizSink::channel(16);
        let stage = FanoutStage::new(Box::new(viz), dispatcher, store.clone(), metrics.clone());

        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(stage.run(rx, Duration::from_secs(60)));

        let quiet = record(60_000, 95.0, false, Action::Hodl);
        let breakout = record(120_000, 105.0, true, Action::Sell);
        tx.send(Flow::Item(quiet.clone())).await.unwrap();
        tx.send(Flow::Item(breakout.clone())).await.unwrap();
        tx.send(Flow::Watermark(Watermark {
            instrument: "AAPL".to_string(),
            watermark_ms: 120_000,
        }))
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = viz_rx.recv().await {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                VizEvent::Record(quiet),
                VizEvent::Record(breakout.clone()),
                VizEvent::Alert(AlertNotice::from_record(&breakout).unwrap()),
            ]
        );

        assert_eq!(store.load_watermarks().unwrap().get("AAPL"), Some(&120_000));
        assert_eq!(
            store.alert_status("AAPL:120000").unwrap(),
            Some(DeliveryStatus::Delivered)
        );

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.alerts_raised, 1);
        assert_eq!(snapshot.notifications_sent, 1);
        assert_eq!(snapshot.viz_failures, 0);
    }
}
