//! Feedback processor
//!
//! Consumes decision events and folds them back into per-user state: risk
//! score, feature history, the recency cache and fraud alerts. Deliveries are
//! acknowledged only after every step succeeded; failures are retried through
//! the channel and dead-lettered once `max_attempts` is reached.

use crate::cache::Cache;
use crate::channel::{notify, Delivery, EventConsumer, EventPublisher};
use crate::error::ProcessorError;
use crate::observability::{names, Metrics, MetricsCollector};
use crate::store::{AlertInsert, Store};
use chrono::Utc;
use riskflow_core::keys::{
    recent_event_key, recent_transactions_key, user_risk_key, RECENT_EVENT_TTL,
    RECENT_TRANSACTIONS_LIMIT, RECENT_TRANSACTIONS_TTL, USER_RISK_TTL,
};
use riskflow_core::types::{FEATURE_FRAUD_SCORE, FEATURE_TRANSACTION_AMOUNT};
use riskflow_core::{
    risk_adjustment, Alert, AlertEvent, DecisionEvent, FeatureRecord, ALERT_TOPIC,
    DEAD_LETTER_TOPIC,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackOptions {
    /// Deliveries before an event is dead-lettered
    pub max_attempts: u32,
    /// Base delay before a failed event is handed back; grows linearly per attempt
    pub retry_backoff: Duration,
}

impl Default for FeedbackOptions {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Effects of one successfully applied event
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackReport {
    /// User risk after the event
    pub risk_score: f64,
    /// False when the event had been applied before (redelivery)
    pub risk_applied: bool,
    /// The alert raised by this call, if any
    pub alert_created: Option<Alert>,
}

/// What happened to a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackOutcome {
    Processed,
    Retried,
    DeadLettered,
}

/// Decision event consumer
pub struct FeedbackProcessor {
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<MetricsCollector>,
    options: FeedbackOptions,
}

impl FeedbackProcessor {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn Cache>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            cache,
            publisher,
            metrics: Arc::new(MetricsCollector::with_defaults()),
            options: FeedbackOptions::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_options(mut self, options: FeedbackOptions) -> Self {
        self.options = options;
        self
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Apply one decision event. Safe to call again for the same event.
    pub async fn handle_event(&self, event: &DecisionEvent) -> Result<FeedbackReport, ProcessorError> {
        let adjustment = risk_adjustment(event.is_fraud, event.fraud_score, event.amount);
        let update = self
            .store
            .apply_risk_feedback(&event.transaction_id, &event.user_id, adjustment)
            .await?;
        self.cache
            .set(
                &user_risk_key(&event.user_id),
                &update.risk_score.to_string(),
                USER_RISK_TTL,
            )
            .await?;

        if event.device_id.is_some() || event.ip_address.is_some() {
            self.store
                .enrich_transaction(
                    &event.transaction_id,
                    event.device_id.as_deref(),
                    event.ip_address.as_deref(),
                )
                .await?;
        }

        let now = Utc::now();
        self.store
            .append_features(&[
                FeatureRecord::new(&event.user_id, FEATURE_TRANSACTION_AMOUNT, event.amount, now),
                FeatureRecord::new(&event.user_id, FEATURE_FRAUD_SCORE, event.fraud_score, now),
            ])
            .await?;

        let payload =
            serde_json::to_string(event).map_err(|e| ProcessorError::Encode(e.to_string()))?;
        self.cache
            .set(&recent_event_key(&event.transaction_id), &payload, RECENT_EVENT_TTL)
            .await?;
        self.cache
            .push_recent(
                &recent_transactions_key(&event.user_id),
                &event.transaction_id,
                RECENT_TRANSACTIONS_LIMIT,
                RECENT_TRANSACTIONS_TTL,
            )
            .await?;

        let alert_created = if event.is_fraud {
            self.raise_alert(event).await?
        } else {
            None
        };

        debug!(
            transaction_id = %event.transaction_id,
            user_id = %event.user_id,
            risk_score = update.risk_score,
            risk_applied = update.applied,
            "Decision event applied"
        );

        Ok(FeedbackReport {
            risk_score: update.risk_score,
            risk_applied: update.applied,
            alert_created,
        })
    }

    async fn raise_alert(&self, event: &DecisionEvent) -> Result<Option<Alert>, ProcessorError> {
        let alert = Alert::fraud_detected(&event.transaction_id, event.fraud_score);
        match self.store.create_alert(&alert).await? {
            AlertInsert::Created => {
                self.metrics.counter(names::ALERTS_CREATED).inc();
                info!(
                    alert_id = %alert.alert_id,
                    transaction_id = %event.transaction_id,
                    severity = %alert.severity,
                    "Fraud alert created"
                );

                let alert_event = AlertEvent::from_alert(&alert, &event.user_id, event.fraud_score);
                if !notify(
                    self.publisher.as_ref(),
                    ALERT_TOPIC,
                    Some(&event.user_id),
                    &alert_event,
                )
                .await
                {
                    self.metrics.counter(names::NOTIFICATION_FAILURES).inc();
                }
                Ok(Some(alert))
            }
            AlertInsert::Exists(alert_id) => {
                debug!(alert_id = %alert_id, transaction_id = %event.transaction_id, "Alert already exists");
                Ok(None)
            }
        }
    }

    /// Process one delivery and settle it with the consumer
    pub async fn handle_delivery<C>(&self, consumer: &mut C, delivery: Delivery) -> FeedbackOutcome
    where
        C: EventConsumer + ?Sized,
    {
        let event = match serde_json::from_slice::<DecisionEvent>(&delivery.payload) {
            Ok(event) => event,
            Err(e) => {
                let err = ProcessorError::Decode(e.to_string());
                error!(
                    partition = delivery.partition,
                    offset = delivery.offset,
                    error = %err,
                    "Poison message"
                );
                self.dead_letter(consumer, &delivery).await;
                return FeedbackOutcome::DeadLettered;
            }
        };

        match self.handle_event(&event).await {
            Ok(_) => {
                if let Err(e) = consumer.ack(&delivery).await {
                    warn!(transaction_id = %event.transaction_id, error = %e, "Ack failed");
                }
                self.metrics.counter(names::FEEDBACK_PROCESSED).inc();
                FeedbackOutcome::Processed
            }
            Err(e) if delivery.attempt >= self.options.max_attempts => {
                error!(
                    transaction_id = %event.transaction_id,
                    attempt = delivery.attempt,
                    error = %e,
                    "Giving up on decision event"
                );
                self.dead_letter(consumer, &delivery).await;
                FeedbackOutcome::DeadLettered
            }
            Err(e) => {
                warn!(
                    transaction_id = %event.transaction_id,
                    attempt = delivery.attempt,
                    error = %e,
                    "Decision event failed, will retry"
                );
                self.metrics.counter(names::FEEDBACK_RETRIES).inc();
                tokio::time::sleep(self.options.retry_backoff * delivery.attempt.max(1)).await;
                if let Err(e) = consumer.nack(delivery).await {
                    warn!(error = %e, "Nack failed");
                }
                FeedbackOutcome::Retried
            }
        }
    }

    /// Forward to the dead-letter topic (best-effort) and acknowledge
    async fn dead_letter<C>(&self, consumer: &mut C, delivery: &Delivery)
    where
        C: EventConsumer + ?Sized,
    {
        if let Err(e) = self
            .publisher
            .publish(DEAD_LETTER_TOPIC, delivery.key.as_deref(), delivery.payload.clone())
            .await
        {
            error!(offset = delivery.offset, error = %e, "Failed to dead-letter event");
        }
        if let Err(e) = consumer.ack(delivery).await {
            warn!(offset = delivery.offset, error = %e, "Ack failed");
        }
        self.metrics.counter(names::FEEDBACK_DEAD_LETTERED).inc();
    }

    /// Consume until the channel closes or `shutdown` turns true
    pub async fn run<C>(&self, consumer: &mut C, mut shutdown: watch::Receiver<bool>)
    where
        C: EventConsumer + ?Sized,
    {
        info!("Feedback processor started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                polled = consumer.poll() => match polled {
                    Ok(Some(delivery)) => {
                        self.handle_delivery(consumer, delivery).await;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "Poll failed");
                        tokio::time::sleep(self.options.retry_backoff).await;
                    }
                },
            }
        }
        info!("Feedback processor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::channel::MemoryBroker;
    use crate::error::{StoreError, StoreResult};
    use crate::store::{InMemoryStore, RiskUpdate};
    use riskflow_core::{AlertStatus, TransactionRecord, User, DECISION_TOPIC};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn event(id: &str, user: &str, amount: f64, score: f64) -> DecisionEvent {
        DecisionEvent {
            transaction_id: id.to_string(),
            user_id: user.to_string(),
            amount,
            fraud_score: score,
            is_fraud: riskflow_core::is_fraud(score),
            timestamp: 1_700_000_000,
            device_id: None,
            ip_address: None,
        }
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        cache: Arc<MemoryCache>,
        broker: Arc<MemoryBroker>,
        processor: FeedbackProcessor,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let broker = Arc::new(MemoryBroker::new(1));
        let processor = FeedbackProcessor::new(store.clone(), cache.clone(), broker.clone())
            .with_options(FeedbackOptions {
                max_attempts: 3,
                retry_backoff: Duration::from_millis(1),
            });
        Fixture {
            store,
            cache,
            broker,
            processor,
        }
    }

    async fn seed_transaction(store: &InMemoryStore, event: &DecisionEvent) {
        store.ensure_user(&event.user_id, 0.5).await.unwrap();
        store
            .insert_transaction(&TransactionRecord {
                transaction_id: event.transaction_id.clone(),
                user_id: event.user_id.clone(),
                amount: event.amount,
                timestamp: Utc::now(),
                merchant_id: "m1".to_string(),
                merchant_risk: 0.9,
                device_id: None,
                ip_address: None,
                is_fraud: event.is_fraud,
                fraud_score: event.fraud_score,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fraud_event_updates_risk_and_raises_alert() {
        let f = fixture();
        let ev = event("t1", "u1", 6000.0, 0.83);
        seed_transaction(&f.store, &ev).await;

        let report = f.processor.handle_event(&ev).await.unwrap();

        // 0.5 + 0.1 + 0.05 + 0.03
        assert!((report.risk_score - 0.68).abs() < 1e-9);
        assert!(report.risk_applied);
        let alert = report.alert_created.unwrap();
        assert_eq!(alert.severity, riskflow_core::Severity::High);
        assert_eq!(alert.status, AlertStatus::Open);

        let cached = f.cache.get(&user_risk_key("u1")).await.unwrap().unwrap();
        assert!((cached.parse::<f64>().unwrap() - 0.68).abs() < 1e-9);

        let features = f.store.features_for("u1").await;
        assert_eq!(features.len(), 2);
        assert_eq!(features[0].feature_name, FEATURE_TRANSACTION_AMOUNT);
        assert_eq!(features[1].feature_value, 0.83);

        let alerts = f.broker.published(ALERT_TOPIC);
        assert_eq!(alerts.len(), 1);
        let published: AlertEvent = serde_json::from_slice(&alerts[0].payload).unwrap();
        assert_eq!(published.alert_id, alert.alert_id);
        assert_eq!(published.user_id, "u1");
    }

    #[tokio::test]
    async fn test_replay_is_idempotent_for_risk_and_alerts() {
        let f = fixture();
        let ev = event("t1", "u1", 6000.0, 0.95);
        seed_transaction(&f.store, &ev).await;

        let first = f.processor.handle_event(&ev).await.unwrap();
        let second = f.processor.handle_event(&ev).await.unwrap();

        assert!(!second.risk_applied);
        assert_eq!(first.risk_score, second.risk_score);
        assert!(second.alert_created.is_none());
        assert_eq!(f.store.alerts_for("t1").await.len(), 1);
        assert_eq!(f.broker.published(ALERT_TOPIC).len(), 1);
        assert_eq!(f.processor.metrics().counter(names::ALERTS_CREATED).get(), 1);
    }

    #[tokio::test]
    async fn test_clean_event_lowers_risk_without_alert() {
        let f = fixture();
        f.store.insert_user(User::new("u1", 0.01)).await;

        let report = f.processor.handle_event(&event("t1", "u1", 20.0, 0.2)).await.unwrap();
        assert_eq!(report.risk_score, 0.0);
        assert!(report.alert_created.is_none());
        assert!(f.broker.published(ALERT_TOPIC).is_empty());
    }

    #[tokio::test]
    async fn test_recency_list_bounded_newest_first() {
        let f = fixture();
        for i in 0..12 {
            f.processor
                .handle_event(&event(&format!("t{}", i), "u1", 10.0, 0.35))
                .await
                .unwrap();
        }
        let recent = f.cache.recent(&recent_transactions_key("u1")).await.unwrap();
        assert_eq!(recent.len(), RECENT_TRANSACTIONS_LIMIT);
        assert_eq!(recent[0], "t11");
        assert_eq!(recent[9], "t2");

        // Redelivery does not duplicate the id
        f.processor
            .handle_event(&event("t5", "u1", 10.0, 0.35))
            .await
            .unwrap();
        let recent = f.cache.recent(&recent_transactions_key("u1")).await.unwrap();
        assert_eq!(recent[0], "t5");
        assert_eq!(recent.iter().filter(|id| id.as_str() == "t5").count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_processed_event_cached_for_half_an_hour() {
        let f = fixture();
        let mut ev = event("t1", "u1", 42.0, 0.35);
        ev.device_id = Some("dev-1".to_string());
        f.processor.handle_event(&ev).await.unwrap();

        let cached = f.cache.get(&recent_event_key("t1")).await.unwrap().unwrap();
        let decoded: DecisionEvent = serde_json::from_str(&cached).unwrap();
        assert_eq!(decoded, ev);

        tokio::time::advance(RECENT_EVENT_TTL + Duration::from_secs(1)).await;
        assert!(f.cache.get(&recent_event_key("t1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enrichment_fills_device_and_ip() {
        let f = fixture();
        let mut ev = event("t1", "u1", 10.0, 0.35);
        seed_transaction(&f.store, &ev).await;
        ev.device_id = Some("dev-1".to_string());
        ev.ip_address = Some("10.0.0.9".to_string());

        f.processor.handle_event(&ev).await.unwrap();
        let tx = f.store.get_transaction("t1").await.unwrap().unwrap();
        assert_eq!(tx.device_id.as_deref(), Some("dev-1"));
        assert_eq!(tx.ip_address.as_deref(), Some("10.0.0.9"));
    }

    #[tokio::test]
    async fn test_poison_message_dead_lettered() {
        let f = fixture();
        f.broker
            .publish(DECISION_TOPIC, Some("u1"), b"{not json".to_vec())
            .await
            .unwrap();
        let mut consumer = f.broker.consumers(DECISION_TOPIC).remove(0);

        let delivery = consumer.poll().await.unwrap().unwrap();
        let outcome = f.processor.handle_delivery(&mut consumer, delivery).await;

        assert_eq!(outcome, FeedbackOutcome::DeadLettered);
        let dlq = f.broker.published(DEAD_LETTER_TOPIC);
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].payload, b"{not json".to_vec());
        assert_eq!(f.broker.pending(DECISION_TOPIC), 0);
    }

    /// Store whose alert insert fails a fixed number of times
    struct FlakyAlertStore {
        inner: InMemoryStore,
        failures_left: AtomicU32,
    }

    #[async_trait::async_trait]
    impl Store for FlakyAlertStore {
        async fn ping(&self) -> StoreResult<()> {
            self.inner.ping().await
        }
        async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
            self.inner.get_user(user_id).await
        }
        async fn average_amount(&self, user_id: &str) -> StoreResult<Option<f64>> {
            self.inner.average_amount(user_id).await
        }
        async fn ensure_user(&self, user_id: &str, default_risk: f64) -> StoreResult<()> {
            self.inner.ensure_user(user_id, default_risk).await
        }
        async fn insert_transaction(&self, record: &TransactionRecord) -> StoreResult<()> {
            self.inner.insert_transaction(record).await
        }
        async fn get_transaction(&self, id: &str) -> StoreResult<Option<TransactionRecord>> {
            self.inner.get_transaction(id).await
        }
        async fn enrich_transaction(
            &self,
            id: &str,
            device_id: Option<&str>,
            ip_address: Option<&str>,
        ) -> StoreResult<()> {
            self.inner.enrich_transaction(id, device_id, ip_address).await
        }
        async fn apply_risk_feedback(
            &self,
            event_id: &str,
            user_id: &str,
            adjustment: f64,
        ) -> StoreResult<RiskUpdate> {
            self.inner.apply_risk_feedback(event_id, user_id, adjustment).await
        }
        async fn append_features(&self, records: &[FeatureRecord]) -> StoreResult<()> {
            self.inner.append_features(records).await
        }
        async fn create_alert(&self, alert: &Alert) -> StoreResult<AlertInsert> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Database("connection reset".to_string()));
            }
            self.inner.create_alert(alert).await
        }
        async fn list_alerts(&self, status: AlertStatus, limit: usize) -> StoreResult<Vec<Alert>> {
            self.inner.list_alerts(status, limit).await
        }
    }

    fn flaky_processor(failures: u32, broker: Arc<MemoryBroker>) -> (Arc<FlakyAlertStore>, FeedbackProcessor) {
        let store = Arc::new(FlakyAlertStore {
            inner: InMemoryStore::new(),
            failures_left: AtomicU32::new(failures),
        });
        let processor = FeedbackProcessor::new(store.clone(), Arc::new(MemoryCache::new()), broker)
            .with_options(FeedbackOptions {
                max_attempts: 3,
                retry_backoff: Duration::from_millis(1),
            });
        (store, processor)
    }

    #[tokio::test]
    async fn test_transient_failure_retried_without_double_counting() {
        let broker = Arc::new(MemoryBroker::new(1));
        let (store, processor) = flaky_processor(1, broker.clone());
        let ev = event("t1", "u1", 6000.0, 0.83);
        seed_transaction(&store.inner, &ev).await;
        let payload = serde_json::to_vec(&ev).unwrap();
        broker.publish(DECISION_TOPIC, Some("u1"), payload).await.unwrap();
        let mut consumer = broker.consumers(DECISION_TOPIC).remove(0);

        let first = consumer.poll().await.unwrap().unwrap();
        assert_eq!(processor.handle_delivery(&mut consumer, first).await, FeedbackOutcome::Retried);

        let second = consumer.poll().await.unwrap().unwrap();
        assert_eq!(second.attempt, 2);
        assert_eq!(processor.handle_delivery(&mut consumer, second).await, FeedbackOutcome::Processed);

        // Risk applied once even though the event was handled twice
        let user = store.get_user("u1").await.unwrap().unwrap();
        assert!((user.risk_score - 0.68).abs() < 1e-9);
        assert_eq!(store.inner.alerts_for("t1").await.len(), 1);
        assert_eq!(processor.metrics().counter(names::FEEDBACK_RETRIES).get(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_event_dead_lettered() {
        let broker = Arc::new(MemoryBroker::new(1));
        let (store, processor) = flaky_processor(u32::MAX, broker.clone());
        let ev = event("t1", "u1", 6000.0, 0.83);
        seed_transaction(&store.inner, &ev).await;
        let payload = serde_json::to_vec(&ev).unwrap();
        broker.publish(DECISION_TOPIC, Some("u1"), payload).await.unwrap();
        let mut consumer = broker.consumers(DECISION_TOPIC).remove(0);

        let mut outcomes = Vec::new();
        for _ in 0..3 {
            let delivery = consumer.poll().await.unwrap().unwrap();
            outcomes.push(processor.handle_delivery(&mut consumer, delivery).await);
        }

        assert_eq!(
            outcomes,
            vec![
                FeedbackOutcome::Retried,
                FeedbackOutcome::Retried,
                FeedbackOutcome::DeadLettered
            ]
        );
        assert_eq!(broker.published(DEAD_LETTER_TOPIC).len(), 1);
        assert_eq!(broker.pending(DECISION_TOPIC), 0);
    }

    #[tokio::test]
    async fn test_run_drains_until_close() {
        let f = fixture();
        for i in 0..3 {
            let payload = serde_json::to_vec(&event(&format!("t{}", i), "u1", 10.0, 0.35)).unwrap();
            f.broker.publish(DECISION_TOPIC, Some("u1"), payload).await.unwrap();
        }
        let mut consumer = f.broker.consumers(DECISION_TOPIC).remove(0);
        f.broker.close();

        let (_tx, rx) = watch::channel(false);
        f.processor.run(&mut consumer, rx).await;

        assert_eq!(f.processor.metrics().counter(names::FEEDBACK_PROCESSED).get(), 3);
        assert_eq!(f.cache.recent(&recent_transactions_key("u1")).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_signal() {
        let f = fixture();
        let mut consumer = f.broker.consumers(DECISION_TOPIC).remove(0);
        let (tx, rx) = watch::channel(false);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(true).unwrap();
        });

        tokio::time::timeout(Duration::from_secs(2), f.processor.run(&mut consumer, rx))
            .await
            .unwrap();
        stopper.await.unwrap();
    }
}
