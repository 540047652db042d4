//! Scan processing
//!
//! Turns a raw tag read into a stored scan record and a best-effort status
//! notification. For registered tags the stored status flips on every scan;
//! unregistered tags are always recorded as absent.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::domain::{NewScan, ScanRecord, ScanStatus, TagCode, STATUS_TOPIC};
use crate::infra::{
    CircuitBreaker, CircuitBreakerError, CircuitBreakerStats, CircuitState, LedgerError,
    NotifyError, ScanLedger, StatusPublisher, TagGuard, TagLocks,
};
use crate::metrics::{metric_names, timed, MetricsRegistry};

/// Default bound on a single status publish
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_millis(2000);

/// Scan failures that are reported to the caller
#[derive(Error, Debug)]
pub enum ScanError {
    /// The tag code is missing or blank; nothing was written
    #[error("validation error: {0}")]
    Validation(String),

    /// The ledger could not be read or written; nothing was published
    #[error("storage error: {0}")]
    Storage(#[from] LedgerError),
}

/// Outcome of a successful scan
#[derive(Debug, Clone)]
pub struct ProcessedScan {
    /// The record as stored
    pub record: ScanRecord,
    /// Whether the tag was registered at scan time
    pub registered: bool,
    /// Set when the status notification could not be delivered
    pub notify_error: Option<NotifyError>,
}

/// Records scans and publishes the resulting presence status
pub struct ScanProcessor {
    ledger: Arc<dyn ScanLedger>,
    publisher: Arc<dyn StatusPublisher>,
    locks: TagLocks,
    /// Orders notifications per tag; taken before `locks` is released
    publish_turns: TagLocks,
    breaker: CircuitBreaker,
    notify_timeout: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl ScanProcessor {
    pub fn new(ledger: Arc<dyn ScanLedger>, publisher: Arc<dyn StatusPublisher>) -> Self {
        Self {
            ledger,
            publisher,
            locks: TagLocks::new(),
            publish_turns: TagLocks::new(),
            breaker: CircuitBreaker::new("status_publisher"),
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn notifier_stats(&self) -> &CircuitBreakerStats {
        self.breaker.stats()
    }

    pub async fn notifier_state(&self) -> CircuitState {
        self.breaker.state().await
    }

    /// Tags currently being processed
    pub fn active_locks(&self) -> usize {
        self.locks.active()
    }

    /// Record one scan of `raw_tag` and publish the new status.
    ///
    /// A notification failure never fails the call; it is returned in
    /// [`ProcessedScan::notify_error`]. Notifications for one tag are sent in
    /// the order their records were inserted.
    #[instrument(skip(self, raw_tag), fields(tag = %raw_tag.trim()))]
    pub async fn process_scan(&self, raw_tag: &str) -> Result<ProcessedScan, ScanError> {
        let tag = match TagCode::parse(raw_tag) {
            Ok(tag) => tag,
            Err(e) => {
                self.metrics
                    .inc_counter(metric_names::SCAN_VALIDATION_FAILURES)
                    .await;
                return Err(ScanError::Validation(e.to_string()));
            }
        };

        let (record, registered, publish_turn) = match timed(
            &self.metrics,
            metric_names::SCAN_LATENCY,
            self.record_scan(&tag),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Failed to record scan");
                self.metrics
                    .inc_counter(metric_names::SCAN_STORAGE_FAILURES)
                    .await;
                return Err(ScanError::Storage(e));
            }
        };

        self.metrics.inc_counter(metric_names::SCANS_TOTAL).await;
        self.metrics
            .inc_counter(if registered {
                metric_names::SCANS_REGISTERED
            } else {
                metric_names::SCANS_UNREGISTERED
            })
            .await;

        info!(
            id = record.id,
            status = %record.status,
            registered,
            "Scan recorded"
        );

        let notify_error = self.publish_status(record.status).await.err();
        drop(publish_turn);

        Ok(ProcessedScan {
            record,
            registered,
            notify_error,
        })
    }

    /// Check-then-insert under the tag lock. Returns the publish turn for the
    /// inserted record, claimed while the tag lock is still held.
    async fn record_scan(
        &self,
        tag: &TagCode,
    ) -> Result<(ScanRecord, bool, TagGuard<'_>), LedgerError> {
        let _guard = self.locks.lock(tag).await;

        let registered = self.ledger.exists_registered(tag).await?;
        let status = if registered {
            let current = self
                .ledger
                .latest_by_tag(tag)
                .await?
                .map(|latest| latest.status)
                .unwrap_or_default();
            current.toggled()
        } else {
            ScanStatus::Absent
        };

        let record = self
            .ledger
            .insert(NewScan::new(tag.clone(), status, registered))
            .await?;

        let publish_turn = self.publish_turns.lock(tag).await;
        Ok((record, registered, publish_turn))
    }

    /// Publish `status` on the status topic.
    ///
    /// Bounded by the notify timeout and guarded by the circuit breaker.
    /// Failures are logged and counted here; callers decide whether to
    /// surface them.
    pub async fn publish_status(&self, status: ScanStatus) -> Result<(), NotifyError> {
        let result = self
            .breaker
            .call_with_timeout(
                self.publisher.publish(STATUS_TOPIC, status.as_payload()),
                self.notify_timeout,
            )
            .await
            .map_err(|e| match e {
                CircuitBreakerError::CircuitOpen => NotifyError::CircuitOpen,
                CircuitBreakerError::ServiceError(e) => e,
                CircuitBreakerError::Timeout => NotifyError::Timeout(self.notify_timeout),
            });

        match &result {
            Ok(()) => {
                debug!(topic = STATUS_TOPIC, payload = status.as_payload(), "Status published");
                self.metrics.inc_counter(metric_names::NOTIFICATIONS_SENT).await;
            }
            Err(e) => {
                warn!(
                    topic = STATUS_TOPIC,
                    payload = status.as_payload(),
                    error = %e,
                    "Status notification failed"
                );
                self.metrics
                    .inc_counter(metric_names::NOTIFICATION_FAILURES)
                    .await;
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{
        LedgerAdmin, MockScanLedger, MockStatusPublisher, SqliteScanLedger,
    };
    use async_trait::async_trait;

    struct SlowPublisher(Duration);

    #[async_trait]
    impl StatusPublisher for SlowPublisher {
        async fn publish(&self, _topic: &str, _payload: &str) -> Result<(), NotifyError> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    fn publisher_ok(times: usize) -> MockStatusPublisher {
        let mut publisher = MockStatusPublisher::new();
        publisher
            .expect_publish()
            .times(times)
            .returning(|_, _| Ok(()));
        publisher
    }

    fn tag(raw: &str) -> TagCode {
        TagCode::parse(raw).unwrap()
    }

    async fn setup(publisher: impl StatusPublisher + 'static) -> (ScanProcessor, Arc<SqliteScanLedger>) {
        let ledger = Arc::new(SqliteScanLedger::in_memory().await.unwrap());
        let processor = ScanProcessor::new(ledger.clone(), Arc::new(publisher));
        (processor, ledger)
    }

    #[tokio::test]
    async fn test_registered_tag_alternates() {
        let (processor, ledger) = setup(publisher_ok(3)).await;
        ledger.register(&tag("22C19E7A")).await.unwrap();

        let mut statuses = Vec::new();
        for _ in 0..3 {
            let scan = processor.process_scan("22C19E7A").await.unwrap();
            assert!(scan.registered);
            assert!(scan.record.registered);
            assert!(scan.notify_error.is_none());
            statuses.push(scan.record.status);
        }

        assert_eq!(
            statuses,
            vec![ScanStatus::Present, ScanStatus::Absent, ScanStatus::Present]
        );
    }

    #[tokio::test]
    async fn test_unregistered_tag_is_always_absent() {
        let (processor, _ledger) = setup(publisher_ok(2)).await;

        for _ in 0..2 {
            let scan = processor.process_scan("ZZZZ0000").await.unwrap();
            assert_eq!(scan.record.status, ScanStatus::Absent);
            assert!(!scan.registered);
            assert!(!scan.record.registered);
            assert_eq!(scan.record.rfid_number, "ZZZZ0000");
        }
    }

    #[tokio::test]
    async fn test_empty_tag_is_rejected_without_write() {
        let (processor, ledger) = setup(publisher_ok(0)).await;

        let err = processor.process_scan("   ").await.unwrap_err();
        assert!(matches!(err, ScanError::Validation(_)));
        assert_eq!(ledger.count().await.unwrap(), 0);
        assert_eq!(
            processor
                .metrics()
                .get_counter(metric_names::SCAN_VALIDATION_FAILURES)
                .await,
            1
        );
    }

    #[tokio::test]
    async fn test_tag_is_trimmed_before_lookup() {
        let (processor, ledger) = setup(publisher_ok(1)).await;
        ledger.register(&tag("22C19E7A")).await.unwrap();

        let scan = processor.process_scan(" 22C19E7A\n").await.unwrap();
        assert!(scan.registered);
        assert_eq!(scan.record.rfid_number, "22C19E7A");
    }

    #[tokio::test]
    async fn test_publisher_failure_does_not_fail_scan() {
        let mut publisher = MockStatusPublisher::new();
        publisher
            .expect_publish()
            .times(1)
            .returning(|_, _| Err(NotifyError::Publish("broker down".into())));
        let (processor, ledger) = setup(publisher).await;
        ledger.register(&tag("22C19E7A")).await.unwrap();

        let scan = processor.process_scan("22C19E7A").await.unwrap();

        assert_eq!(scan.record.status, ScanStatus::Present);
        assert_eq!(
            scan.notify_error,
            Some(NotifyError::Publish("broker down".into()))
        );
        let stored = ledger.get(scan.record.id).await.unwrap().unwrap();
        assert_eq!(stored, scan.record);
        assert_eq!(
            processor
                .metrics()
                .get_counter(metric_names::NOTIFICATION_FAILURES)
                .await,
            1
        );
    }

    #[tokio::test]
    async fn test_slow_publisher_times_out() {
        let (processor, _ledger) = setup(SlowPublisher(Duration::from_secs(5))).await;
        let processor = processor.with_notify_timeout(Duration::from_millis(20));

        let scan = processor.process_scan("ZZZZ0000").await.unwrap();

        assert_eq!(
            scan.notify_error,
            Some(NotifyError::Timeout(Duration::from_millis(20)))
        );
    }

    #[tokio::test]
    async fn test_repeated_failures_open_circuit() {
        let mut publisher = MockStatusPublisher::new();
        publisher
            .expect_publish()
            .times(3)
            .returning(|_, _| Err(NotifyError::Publish("broker down".into())));
        let (processor, _ledger) = setup(publisher).await;

        for _ in 0..3 {
            let scan = processor.process_scan("ZZZZ0000").await.unwrap();
            assert!(matches!(scan.notify_error, Some(NotifyError::Publish(_))));
        }

        let scan = processor.process_scan("ZZZZ0000").await.unwrap();
        assert_eq!(scan.notify_error, Some(NotifyError::CircuitOpen));
    }

    #[tokio::test]
    async fn test_storage_failure_skips_notification() {
        let mut ledger = MockScanLedger::new();
        ledger
            .expect_exists_registered()
            .returning(|_| Ok(true));
        ledger
            .expect_latest_by_tag()
            .returning(|_| Err(LedgerError::Database(sqlx::Error::PoolTimedOut)));
        ledger.expect_insert().times(0);

        let processor = ScanProcessor::new(Arc::new(ledger), Arc::new(publisher_ok(0)));

        let err = processor.process_scan("22C19E7A").await.unwrap_err();
        assert!(matches!(err, ScanError::Storage(LedgerError::Database(_))));
        assert_eq!(
            processor
                .metrics()
                .get_counter(metric_names::SCAN_STORAGE_FAILURES)
                .await,
            1
        );
        assert_eq!(processor.active_locks(), 0);
    }

    #[tokio::test]
    async fn test_insert_failure_is_storage_error() {
        let mut ledger = MockScanLedger::new();
        ledger
            .expect_exists_registered()
            .returning(|_| Ok(false));
        ledger
            .expect_insert()
            .times(1)
            .returning(|_| Err(LedgerError::Database(sqlx::Error::PoolClosed)));

        let processor = ScanProcessor::new(Arc::new(ledger), Arc::new(publisher_ok(0)));

        let err = processor.process_scan("ZZZZ0000").await.unwrap_err();
        assert!(matches!(err, ScanError::Storage(_)));
    }

    #[tokio::test]
    async fn test_registration_is_read_from_ledger_not_latest_record() {
        // Latest record claims registered=false, but the tag is registered.
        let mut ledger = MockScanLedger::new();
        ledger.expect_exists_registered().returning(|_| Ok(true));
        ledger.expect_latest_by_tag().returning(|_| {
            let now = chrono::Utc::now();
            Ok(Some(ScanRecord {
                id: 9,
                rfid_number: "22C19E7A".into(),
                status: ScanStatus::Present,
                registered: false,
                created_at: now,
                updated_at: now,
            }))
        });
        ledger.expect_insert().times(1).returning(|scan| {
            let now = chrono::Utc::now();
            Ok(ScanRecord {
                id: 10,
                rfid_number: scan.tag.into_inner(),
                status: scan.status,
                registered: scan.registered,
                created_at: now,
                updated_at: now,
            })
        });

        let processor = ScanProcessor::new(Arc::new(ledger), Arc::new(publisher_ok(1)));

        let scan = processor.process_scan("22C19E7A").await.unwrap();
        assert_eq!(scan.record.status, ScanStatus::Absent);
        assert!(scan.registered);
    }

    #[tokio::test]
    async fn test_concurrent_scans_alternate() {
        let (processor, ledger) = setup(publisher_ok(10)).await;
        ledger.register(&tag("22C19E7A")).await.unwrap();
        let processor = Arc::new(processor);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let processor = processor.clone();
            handles.push(tokio::spawn(async move {
                processor.process_scan("22C19E7A").await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut records: Vec<ScanRecord> = ledger
            .list()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.rfid_number == "22C19E7A")
            .collect();
        records.sort_by_key(|r| r.id);

        // Seed record first, then strict alternation starting at present.
        assert_eq!(records.len(), 11);
        for (i, record) in records.iter().skip(1).enumerate() {
            let expected = if i % 2 == 0 {
                ScanStatus::Present
            } else {
                ScanStatus::Absent
            };
            assert_eq!(record.status, expected, "record {} out of order", record.id);
        }
        assert_eq!(processor.active_locks(), 0);
    }

    /// Remembers payloads; "1" is slower to publish than "0"
    #[derive(Default)]
    struct UnevenPublisher {
        sent: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StatusPublisher for UnevenPublisher {
        async fn publish(&self, _topic: &str, payload: &str) -> Result<(), NotifyError> {
            if payload == "1" {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            self.sent.lock().unwrap().push(payload.to_string());
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_notifications_follow_insert_order() {
        let ledger = Arc::new(SqliteScanLedger::in_memory().await.unwrap());
        ledger.register(&tag("22C19E7A")).await.unwrap();
        let publisher = Arc::new(UnevenPublisher::default());
        let processor = Arc::new(ScanProcessor::new(ledger.clone(), publisher.clone()));

        let mut handles = Vec::new();
        for _ in 0..12 {
            let processor = processor.clone();
            handles.push(tokio::spawn(async move {
                processor.process_scan("22C19E7A").await.unwrap().record
            }));
        }
        let mut records = Vec::new();
        for handle in handles {
            records.push(handle.await.unwrap());
        }
        records.sort_by_key(|r| r.id);

        let expected: Vec<String> = records
            .iter()
            .map(|r| r.status.as_payload().to_string())
            .collect();
        assert_eq!(*publisher.sent.lock().unwrap(), expected);

        let latest = ledger.latest_by_tag(&tag("22C19E7A")).await.unwrap().unwrap();
        assert_eq!(
            publisher.sent.lock().unwrap().last().map(String::as_str),
            Some(latest.status.as_payload())
        );
        assert_eq!(processor.active_locks(), 0);
    }

    #[tokio::test]
    async fn test_manual_update_becomes_baseline() {
        let (processor, ledger) = setup(publisher_ok(2)).await;
        ledger.register(&tag("22C19E7A")).await.unwrap();

        let first = processor.process_scan("22C19E7A").await.unwrap();
        assert_eq!(first.record.status, ScanStatus::Present);

        ledger
            .update_status(first.record.id, ScanStatus::Absent)
            .await
            .unwrap();

        let second = processor.process_scan("22C19E7A").await.unwrap();
        assert_eq!(second.record.status, ScanStatus::Present);
    }

    #[tokio::test]
    async fn test_scan_metrics() {
        let (processor, ledger) = setup(publisher_ok(3)).await;
        ledger.register(&tag("22C19E7A")).await.unwrap();

        processor.process_scan("22C19E7A").await.unwrap();
        processor.process_scan("22C19E7A").await.unwrap();
        processor.process_scan("ZZZZ0000").await.unwrap();

        let metrics = processor.metrics();
        assert_eq!(metrics.get_counter(metric_names::SCANS_TOTAL).await, 3);
        assert_eq!(metrics.get_counter(metric_names::SCANS_REGISTERED).await, 2);
        assert_eq!(metrics.get_counter(metric_names::SCANS_UNREGISTERED).await, 1);
        assert_eq!(metrics.get_counter(metric_names::NOTIFICATIONS_SENT).await, 3);
    }
}
