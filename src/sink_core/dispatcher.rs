//! Ledgered, concurrent alert delivery
//!
//! `dispatch` waits for a delivery slot, claims the alert's ledger row before
//! the caller moves on, and only then spawns the delivery task. With every
//! slot busy the caller waits, so a slow notifier backs up the fan-out stage
//! instead of piling up tasks. A restart therefore
//! never sends an alert twice: either the claim exists and the send is
//! suppressed, or it does not and nothing was sent. The trade-off is
//! at-most-once: a crash between claim and send loses that notification.

use crate::pipeline::checkpoint::{CheckpointError, CheckpointStore, DeliveryStatus};
use crate::pipeline::metrics::PipelineMetrics;
use crate::pipeline::types::AlertNotice;
use crate::sink_core::backoff::ExponentialBackoff;
use crate::sink_core::notifier::Notifier;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    store: CheckpointStore,
    permits: Arc<Semaphore>,
    tasks: JoinSet<()>,
    max_retries: u32,
    retry_delay: Duration,
    metrics: Arc<PipelineMetrics>,
}

impl NotificationDispatcher {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        store: CheckpointStore,
        max_concurrency: usize,
        max_retries: u32,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            notifier,
            store,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            tasks: JoinSet::new(),
            max_retries,
            retry_delay: DEFAULT_RETRY_DELAY,
            metrics,
        }
    }

    /// Override the initial retry delay (tests use a few milliseconds)
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Claim and asynchronously deliver one alert
    ///
    /// Waits while `max_concurrency` deliveries are in flight. Returns false
    /// when the alert was already claimed, in which case nothing is sent.
    /// Cancelling the wait leaves the ledger untouched.
    pub async fn dispatch(&mut self, alert: AlertNotice) -> Result<bool, CheckpointError> {
        self.reap_finished();

        let Ok(permit) = self.permits.clone().acquire_owned().await else {
            log::error!("❌ Delivery slots closed, dropping alert {}", alert.idempotency_key());
            return Ok(false);
        };

        if !self.store.claim_alert(&alert)? {
            PipelineMetrics::incr(&self.metrics.notifications_suppressed);
            log::debug!(
                "🔁 Alert {} already claimed, not re-sending",
                alert.idempotency_key()
            );
            return Ok(false);
        }

        let notifier = self.notifier.clone();
        let store = self.store.clone();
        let metrics = self.metrics.clone();
        let backoff = ExponentialBackoff::new(self.retry_delay, MAX_RETRY_DELAY, self.max_retries);

        self.tasks.spawn(async move {
            let _permit = permit;
            let key = alert.idempotency_key();
            let (status, attempts) = deliver(notifier.as_ref(), &alert, backoff).await;

            match status {
                DeliveryStatus::Delivered => {
                    PipelineMetrics::incr(&metrics.notifications_sent);
                    log::info!("🔔 Notified {} via {}", alert.message(), notifier.name());
                }
                _ => {
                    PipelineMetrics::incr(&metrics.notifications_failed);
                    log::error!("❌ Giving up on alert {} after {} attempts", key, attempts);
                }
            }

            if let Err(e) = store.mark_alert(&key, status, attempts) {
                log::error!("❌ Failed to record delivery of {}: {}", key, e);
            }
        });

        Ok(true)
    }

    fn reap_finished(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                log::error!("❌ Notification task failed: {}", e);
            }
        }
    }

    /// Deliveries spawned and not yet reaped
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every in-flight delivery to finish
    pub async fn shutdown(&mut self) {
        if !self.tasks.is_empty() {
            log::info!("⏳ Waiting for {} in-flight notifications", self.tasks.len());
        }
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                log::error!("❌ Notification task failed: {}", e);
            }
        }
    }
}

/// Call the notifier until it succeeds, fails permanently or the retry
/// budget runs out. Returns the final status and the number of attempts.
async fn deliver(
    notifier: &dyn Notifier,
    alert: &AlertNotice,
    mut backoff: ExponentialBackoff,
) -> (DeliveryStatus, u32) {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match notifier.notify(alert).await {
            Ok(()) => return (DeliveryStatus::Delivered, attempts),
            Err(e) if e.is_retryable() => {
                log::warn!(
                    "⚠️  {} delivery of {} failed: {}",
                    notifier.name(),
                    alert.idempotency_key(),
                    e
                );
                if backoff.sleep().await.is_err() {
                    return (DeliveryStatus::Failed, attempts);
                }
            }
            Err(e) => {
                log::error!(
                    "❌ {} rejected {}: {}",
                    notifier.name(),
                    alert.idempotency_key(),
                    e
                );
                return (DeliveryStatus::Failed, attempts);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{millis_to_utc, Action};
    use crate::sink_core::notifier::NotifyError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    /// Fails the first `failures` calls with a retryable error
    struct FlakyNotifier {
        failures: u32,
        calls: AtomicU32,
        permanent: bool,
    }

    impl FlakyNotifier {
        fn new(failures: u32, permanent: bool) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                permanent,
            }
        }
    }

    #[async_trait]
    impl Notifier for FlakyNotifier {
        async fn notify(&self, _alert: &AlertNotice) -> Result<(), NotifyError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.permanent {
                return Err(NotifyError::Rejected("invalid_auth".to_string()));
            }
            if call < self.failures {
                return Err(NotifyError::Status {
                    status: 503,
                    body: String::new(),
                });
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    fn alert(end_ms: i64) -> AlertNotice {
        AlertNotice {
            instrument: "AAPL".to_string(),
            t: millis_to_utc(end_ms).unwrap(),
            vwap: 105.0,
            action: Action::Sell,
        }
    }

    fn setup(
        notifier: Arc<FlakyNotifier>,
        max_retries: u32,
    ) -> (TempDir, CheckpointStore, Arc<PipelineMetrics>, NotificationDispatcher) {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::open(dir.path().join("ledger.db")).unwrap();
        let metrics = Arc::new(PipelineMetrics::new());
        let dispatcher =
            NotificationDispatcher::new(notifier, store.clone(), 4, max_retries, metrics.clone())
                .with_retry_delay(Duration::from_millis(1));
        (dir, store, metrics, dispatcher)
    }

    #[tokio::test]
    async fn test_retries_until_delivered() {
        let notifier = Arc::new(FlakyNotifier::new(2, false));
        let (_dir, store, metrics, mut dispatcher) = setup(notifier.clone(), 5);

        assert!(dispatcher.dispatch(alert(60_000)).await.unwrap());
        dispatcher.shutdown().await;

        assert_eq!(notifier.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            store.alert_status("AAPL:60000").unwrap(),
            Some(DeliveryStatus::Delivered)
        );
        assert_eq!(metrics.snapshot().notifications_sent, 1);
    }

    #[tokio::test]
    async fn test_duplicate_dispatch_is_suppressed() {
        let notifier = Arc::new(FlakyNotifier::new(0, false));
        let (_dir, _store, metrics, mut dispatcher) = setup(notifier.clone(), 5);

        assert!(dispatcher.dispatch(alert(60_000)).await.unwrap());
        assert!(!dispatcher.dispatch(alert(60_000)).await.unwrap());
        dispatcher.shutdown().await;

        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.snapshot().notifications_suppressed, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_mark_failed() {
        let notifier = Arc::new(FlakyNotifier::new(u32::MAX, false));
        let (_dir, store, metrics, mut dispatcher) = setup(notifier.clone(), 2);

        dispatcher.dispatch(alert(60_000)).await.unwrap();
        dispatcher.shutdown().await;

        assert_eq!(notifier.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            store.alert_status("AAPL:60000").unwrap(),
            Some(DeliveryStatus::Failed)
        );
        assert_eq!(metrics.snapshot().notifications_failed, 1);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let notifier = Arc::new(FlakyNotifier::new(0, true));
        let (_dir, store, _metrics, mut dispatcher) = setup(notifier.clone(), 5);

        dispatcher.dispatch(alert(60_000)).await.unwrap();
        dispatcher.shutdown().await;

        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.alert_status("AAPL:60000").unwrap(),
            Some(DeliveryStatus::Failed)
        );
    }

    /// Blocks every call until the gate is opened
    struct GatedNotifier {
        gate: Semaphore,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Notifier for GatedNotifier {
        async fn notify(&self, _alert: &AlertNotice) -> Result<(), NotifyError> {
            let _pass = self.gate.acquire().await;
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "gated"
        }
    }

    #[tokio::test]
    async fn test_dispatch_waits_when_all_slots_busy() {
        let notifier = Arc::new(GatedNotifier {
            gate: Semaphore::new(0),
            calls: AtomicU32::new(0),
        });
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::open(dir.path().join("ledger.db")).unwrap();
        let mut dispatcher = NotificationDispatcher::new(
            notifier.clone(),
            store.clone(),
            2,
            0,
            Arc::new(PipelineMetrics::new()),
        );

        assert!(dispatcher.dispatch(alert(60_000)).await.unwrap());
        assert!(dispatcher.dispatch(alert(120_000)).await.unwrap());

        // Third alert has no slot; giving up on the wait claims nothing
        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            dispatcher.dispatch(alert(180_000)),
        )
        .await;
        assert!(blocked.is_err());
        assert_eq!(dispatcher.in_flight(), 2);
        assert_eq!(store.alert_status("AAPL:180000").unwrap(), None);

        notifier.gate.add_permits(1);
        assert!(dispatcher.dispatch(alert(180_000)).await.unwrap());
        dispatcher.shutdown().await;

        assert_eq!(notifier.calls.load(Ordering::SeqCst), 3);
        assert_eq!(dispatcher.in_flight(), 0);
        assert_eq!(store.count_alerts(DeliveryStatus::Delivered).unwrap(), 3);
    }
}
