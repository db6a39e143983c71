//! Intake and scoring service
//!
//! The synchronous path: validate, replay a cached decision when the client
//! retries, look up risk features, score, persist exactly once, publish the
//! decision event and cache the serialized response.

use crate::cache::Cache;
use crate::channel::{notify, EventPublisher};
use crate::error::{ServiceError, StoreError};
use crate::observability::{names, Metrics, MetricsCollector};
use crate::scoring::{ScoreSource, Scorer};
use crate::store::Store;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use riskflow_core::keys::{
    recent_transactions_key, transaction_key, user_risk_key, RESPONSE_TTL,
};
use riskflow_core::scoring::amount_to_history_ratio;
use riskflow_core::{
    is_fraud, Alert, AlertStatus, BatchItemResult, BatchTransactionResponse, CoreError,
    DecisionEvent, ScoringInput, TransactionRecord, TransactionRequest, TransactionResponse,
    User, DECISION_TOPIC, DEFAULT_USER_RISK,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Batch limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Largest accepted batch
    pub max_size: usize,
    /// Items scored concurrently
    pub concurrency: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_size: 1000,
            concurrency: 16,
        }
    }
}

/// Outcome of a single submission
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub response: TransactionResponse,
    /// Serialized response. For a replay these are the cached bytes, unchanged.
    pub body: String,
    pub replayed: bool,
}

/// Liveness of the external collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReport {
    pub store: bool,
    pub cache: bool,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.store && self.cache
    }
}

/// Transaction intake service
pub struct IntakeService {
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
    publisher: Arc<dyn EventPublisher>,
    scorer: Scorer,
    metrics: Arc<MetricsCollector>,
    batch: BatchOptions,
}

impl IntakeService {
    /// Create a service scoring with the heuristic only
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn Cache>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            cache,
            publisher,
            scorer: Scorer::heuristic(),
            metrics: Arc::new(MetricsCollector::with_defaults()),
            batch: BatchOptions::default(),
        }
    }

    pub fn with_scorer(mut self, scorer: Scorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_batch_options(mut self, batch: BatchOptions) -> Self {
        self.batch = batch;
        self
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Score and persist one transaction
    pub async fn process_transaction(
        &self,
        request: TransactionRequest,
    ) -> Result<Decision, ServiceError> {
        let started = Instant::now();
        request.validate()?;

        let client_key = request.transaction_id.is_some();
        let transaction_id = request
            .transaction_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        // A generated id cannot have a cached response yet
        if client_key {
            if let Some(decision) = self.replay(&transaction_id).await {
                return Ok(decision);
            }
        }

        let user_risk = self.lookup_user_risk(&request.user_id).await;
        let historical_average = match self.store.average_amount(&request.user_id).await {
            Ok(average) => average,
            Err(e) => {
                warn!(
                    user_id = %request.user_id,
                    error = %e,
                    "Amount history lookup failed, using default"
                );
                None
            }
        };

        let now = Utc::now();
        let input = ScoringInput {
            transaction_id: Some(transaction_id.clone()),
            user_id: request.user_id.clone(),
            amount: request.amount,
            timestamp: now.timestamp(),
            merchant_id: request.merchant_id.clone(),
            merchant_risk: request.merchant_risk,
            device_id: request.device_id.clone(),
            ip_address: request.ip_address.clone(),
            user_risk_score: user_risk,
            amount_to_history_ratio: amount_to_history_ratio(request.amount, historical_average),
        };

        let scored = self.scorer.score(&input).await;
        if scored.source == ScoreSource::Fallback && self.scorer.has_primary() {
            self.metrics.counter(names::SCORER_FALLBACKS).inc();
        }
        let output = scored.output;
        let flagged = is_fraud(output.fraud_score);

        let record = TransactionRecord {
            transaction_id: transaction_id.clone(),
            user_id: request.user_id.clone(),
            amount: request.amount,
            timestamp: now,
            merchant_id: request.merchant_id.clone(),
            merchant_risk: request.merchant_risk,
            device_id: request.device_id.clone(),
            ip_address: request.ip_address.clone(),
            is_fraud: flagged,
            fraud_score: output.fraud_score,
        };

        self.store
            .ensure_user(&record.user_id, DEFAULT_USER_RISK)
            .await?;
        match self.store.insert_transaction(&record).await {
            Ok(()) => {}
            Err(StoreError::Duplicate(_)) if client_key => {
                return Err(ServiceError::Conflict(format!(
                    "transaction {} was already processed and its response is no longer cached",
                    transaction_id
                )));
            }
            Err(e) => return Err(e.into()),
        }

        let event = DecisionEvent::from_record(&record);
        if !notify(
            self.publisher.as_ref(),
            DECISION_TOPIC,
            Some(event.partition_key()),
            &event,
        )
        .await
        {
            self.metrics.counter(names::NOTIFICATION_FAILURES).inc();
        }

        let response = TransactionResponse {
            transaction_id: transaction_id.clone(),
            is_fraud: flagged,
            fraud_score: output.fraud_score,
            confidence: output.confidence,
            risk_factors: output.risk_factors,
            processing_time_ms: started.elapsed().as_millis() as u64,
        };
        let body = serde_json::to_string(&response)
            .map_err(|e| ServiceError::Internal(format!("Failed to encode response: {}", e)))?;

        if let Err(e) = self
            .cache
            .set_if_absent(&transaction_key(&transaction_id), &body, RESPONSE_TTL)
            .await
        {
            warn!(transaction_id = %transaction_id, error = %e, "Failed to cache response");
        }

        self.metrics.counter(names::TRANSACTIONS_PROCESSED).inc();
        if flagged {
            self.metrics.counter(names::TRANSACTIONS_FLAGGED).inc();
        }
        self.metrics.record_duration(names::INTAKE, started.elapsed());

        info!(
            transaction_id = %transaction_id,
            user_id = %record.user_id,
            fraud_score = response.fraud_score,
            is_fraud = flagged,
            "Transaction processed"
        );

        Ok(Decision {
            response,
            body,
            replayed: false,
        })
    }

    /// Score a batch. Items succeed or fail independently; results keep the
    /// submission order.
    pub async fn process_batch(
        &self,
        requests: Vec<TransactionRequest>,
    ) -> Result<BatchTransactionResponse, ServiceError> {
        let started = Instant::now();
        if requests.len() > self.batch.max_size {
            return Err(CoreError::InvalidField {
                field: "transactions".to_string(),
                message: format!(
                    "batch of {} exceeds the maximum of {} items",
                    requests.len(),
                    self.batch.max_size
                ),
            }
            .into());
        }

        let results = stream::iter(requests)
            .map(|request| async move {
                match self.process_transaction(request).await {
                    Ok(decision) => BatchItemResult::Ok(decision.response),
                    Err(e) => BatchItemResult::Error {
                        error: e.to_string(),
                        code: e.status_code(),
                    },
                }
            })
            .buffered(self.batch.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        Ok(BatchTransactionResponse {
            results,
            total_processing_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    pub async fn get_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<TransactionRecord, ServiceError> {
        self.store
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("transaction {}", transaction_id)))
    }

    pub async fn get_user_risk(&self, user_id: &str) -> Result<User, ServiceError> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("user {}", user_id)))
    }

    /// The user's most recent transaction ids, newest first
    pub async fn recent_transactions(&self, user_id: &str) -> Result<Vec<String>, ServiceError> {
        self.cache
            .recent(&recent_transactions_key(user_id))
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))
    }

    pub async fn list_alerts(
        &self,
        status: AlertStatus,
        limit: usize,
    ) -> Result<Vec<Alert>, ServiceError> {
        Ok(self.store.list_alerts(status, limit).await?)
    }

    pub async fn health(&self) -> HealthReport {
        let (store, cache) = tokio::join!(self.store.ping(), self.cache.ping());
        if let Err(e) = &store {
            warn!(error = %e, "Store health check failed");
        }
        if let Err(e) = &cache {
            warn!(error = %e, "Cache health check failed");
        }
        HealthReport {
            store: store.is_ok(),
            cache: cache.is_ok(),
        }
    }

    async fn replay(&self, transaction_id: &str) -> Option<Decision> {
        let body = match self.cache.get(&transaction_key(transaction_id)).await {
            Ok(Some(body)) => body,
            Ok(None) => return None,
            Err(e) => {
                warn!(transaction_id, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_str::<TransactionResponse>(&body) {
            Ok(response) => {
                debug!(transaction_id, "Replaying cached decision");
                self.metrics.counter(names::IDEMPOTENT_REPLAYS).inc();
                Some(Decision {
                    response,
                    body,
                    replayed: true,
                })
            }
            Err(e) => {
                warn!(transaction_id, error = %e, "Cached decision is unreadable, treating as miss");
                None
            }
        }
    }

    /// Cache, then store, then the default
    async fn lookup_user_risk(&self, user_id: &str) -> f64 {
        match self.cache.get(&user_risk_key(user_id)).await {
            Ok(Some(value)) => match value.parse::<f64>() {
                Ok(risk) if risk.is_finite() => return risk.clamp(0.0, 1.0),
                _ => warn!(user_id, value = %value, "Ignoring malformed cached user risk"),
            },
            Ok(None) => {}
            Err(e) => warn!(user_id, error = %e, "User risk cache lookup failed"),
        }

        match self.store.get_user(user_id).await {
            Ok(Some(user)) => user.risk_score,
            Ok(None) => DEFAULT_USER_RISK,
            Err(e) => {
                warn!(user_id, error = %e, "User risk lookup failed, using default");
                DEFAULT_USER_RISK
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::channel::MemoryBroker;
    use crate::error::StoreResult;
    use crate::store::{AlertInsert, InMemoryStore, RiskUpdate};
    use riskflow_core::keys::USER_RISK_TTL;
    use riskflow_core::FeatureRecord;
    use tokio::sync::Barrier;

    struct Fixture {
        store: Arc<InMemoryStore>,
        cache: Arc<MemoryCache>,
        broker: Arc<MemoryBroker>,
        service: IntakeService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let broker = Arc::new(MemoryBroker::new(2));
        let service = IntakeService::new(store.clone(), cache.clone(), broker.clone());
        Fixture {
            store,
            cache,
            broker,
            service,
        }
    }

    #[tokio::test]
    async fn test_high_risk_transaction_is_flagged() {
        let f = fixture();
        let decision = f
            .service
            .process_transaction(TransactionRequest::new("u1", 6000.0, "m1", 0.9))
            .await
            .unwrap();

        // First transaction: ratio 60 adds the unusual pattern bonus
        assert_eq!(decision.response.fraud_score, 1.0);
        assert!(decision.response.is_fraud);
        assert_eq!(
            decision.response.risk_factors,
            vec!["high_amount", "high_merchant_risk", "unusual_amount_pattern"]
        );
        assert!(!decision.replayed);
        assert!(Uuid::parse_str(&decision.response.transaction_id).is_ok());
    }

    #[tokio::test]
    async fn test_unknown_user_created_before_insert() {
        let f = fixture();
        let decision = f
            .service
            .process_transaction(TransactionRequest::new("new-user", 50.0, "m1", 0.1))
            .await
            .unwrap();

        let user = f.store.get_user("new-user").await.unwrap().unwrap();
        assert_eq!(user.risk_score, DEFAULT_USER_RISK);
        let stored = f
            .store
            .get_transaction(&decision.response.transaction_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.user_id, "new-user");
    }

    #[tokio::test]
    async fn test_validation_has_no_side_effects() {
        let f = fixture();
        let err = f
            .service
            .process_transaction(TransactionRequest::new("u1", -5.0, "m1", 0.1))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 400);
        assert!(f.store.get_user("u1").await.unwrap().is_none());
        assert_eq!(f.store.transaction_count().await, 0);
        assert!(f.broker.published(DECISION_TOPIC).is_empty());
    }

    #[tokio::test]
    async fn test_replay_returns_identical_body() {
        let f = fixture();
        let request = TransactionRequest::new("u1", 120.0, "m1", 0.2).with_transaction_id("retry-1");

        let first = f.service.process_transaction(request.clone()).await.unwrap();
        let second = f.service.process_transaction(request).await.unwrap();

        assert!(second.replayed);
        assert_eq!(first.body, second.body);
        assert_eq!(f.store.transaction_count().await, 1);
        assert_eq!(f.broker.published(DECISION_TOPIC).len(), 1);
        assert_eq!(f.service.metrics().counter(names::IDEMPOTENT_REPLAYS).get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_after_cache_expiry_conflicts() {
        let f = fixture();
        let request = TransactionRequest::new("u1", 120.0, "m1", 0.2).with_transaction_id("retry-2");
        f.service.process_transaction(request.clone()).await.unwrap();

        tokio::time::advance(RESPONSE_TTL + std::time::Duration::from_secs(1)).await;

        let err = f.service.process_transaction(request).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
        assert_eq!(err.status_code(), 409);
    }

    #[tokio::test]
    async fn test_decision_event_keyed_by_user() {
        let f = fixture();
        let decision = f
            .service
            .process_transaction(
                TransactionRequest::new("u7", 80.0, "m1", 0.1)
                    .with_device("dev-1")
                    .with_ip_address("10.1.1.1"),
            )
            .await
            .unwrap();

        let published = f.broker.published(DECISION_TOPIC);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].key.as_deref(), Some("u7"));
        assert_eq!(published[0].partition, f.broker.partition_of(DECISION_TOPIC, "u7"));

        let event: DecisionEvent = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(event.transaction_id, decision.response.transaction_id);
        assert_eq!(event.device_id.as_deref(), Some("dev-1"));
        assert_eq!(event.ip_address.as_deref(), Some("10.1.1.1"));
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_fail_request() {
        let f = fixture();
        f.broker.close();

        let decision = f
            .service
            .process_transaction(TransactionRequest::new("u1", 10.0, "m1", 0.1))
            .await;

        assert!(decision.is_ok());
        assert_eq!(f.store.transaction_count().await, 1);
        assert_eq!(
            f.service.metrics().counter(names::NOTIFICATION_FAILURES).get(),
            1
        );
    }

    enum InsertFault {
        Fail,
        /// Hold each insert until the given number of callers arrive
        Rendezvous(Barrier),
    }

    /// Store whose transaction insert misbehaves
    struct FaultyInsertStore {
        inner: InMemoryStore,
        fault: InsertFault,
    }

    #[async_trait::async_trait]
    impl Store for FaultyInsertStore {
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
            match &self.fault {
                InsertFault::Fail => Err(StoreError::Database("connection refused".to_string())),
                InsertFault::Rendezvous(barrier) => {
                    barrier.wait().await;
                    self.inner.insert_transaction(record).await
                }
            }
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
            self.inner.create_alert(alert).await
        }
        async fn list_alerts(&self, status: AlertStatus, limit: usize) -> StoreResult<Vec<Alert>> {
            self.inner.list_alerts(status, limit).await
        }
    }

    fn faulty_fixture(fault: InsertFault) -> (Arc<MemoryCache>, Arc<MemoryBroker>, IntakeService) {
        let store = Arc::new(FaultyInsertStore {
            inner: InMemoryStore::new(),
            fault,
        });
        let cache = Arc::new(MemoryCache::new());
        let broker = Arc::new(MemoryBroker::new(2));
        let service = IntakeService::new(store, cache.clone(), broker.clone());
        (cache, broker, service)
    }

    #[tokio::test]
    async fn test_storage_failure_leaves_no_trace() {
        let (cache, broker, service) = faulty_fixture(InsertFault::Fail);
        let request = TransactionRequest::new("u1", 120.0, "m1", 0.2).with_transaction_id("tx-down");

        let err = service.process_transaction(request).await.unwrap_err();

        assert!(matches!(err, ServiceError::Storage(_)));
        assert_eq!(err.status_code(), 500);
        assert!(broker.published(DECISION_TOPIC).is_empty());
        assert!(cache.get(&transaction_key("tx-down")).await.unwrap().is_none());
        assert_eq!(service.metrics().counter(names::TRANSACTIONS_PROCESSED).get(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_persists_once() {
        let (_cache, broker, service) = faulty_fixture(InsertFault::Rendezvous(Barrier::new(2)));
        let request = TransactionRequest::new("u1", 120.0, "m1", 0.2).with_transaction_id("tx-race");

        // Both submissions miss the response cache before either inserts
        let (a, b) = tokio::join!(
            service.process_transaction(request.clone()),
            service.process_transaction(request)
        );

        let (ok, err) = match (a, b) {
            (Ok(decision), Err(e)) | (Err(e), Ok(decision)) => (decision, e),
            (a, b) => panic!("expected one success and one conflict, got {:?} and {:?}", a, b),
        };
        assert!(!ok.replayed);
        assert_eq!(ok.response.transaction_id, "tx-race");
        assert!(matches!(err, ServiceError::Conflict(_)));
        assert_eq!(err.status_code(), 409);
        assert_eq!(broker.published(DECISION_TOPIC).len(), 1);
        assert_eq!(service.metrics().counter(names::TRANSACTIONS_PROCESSED).get(), 1);
    }

    #[tokio::test]
    async fn test_cached_user_risk_takes_precedence() {
        let f = fixture();
        f.store.insert_user(User::new("u1", 0.1)).await;
        f.cache
            .set(&user_risk_key("u1"), "0.9", USER_RISK_TTL)
            .await
            .unwrap();

        let decision = f
            .service
            .process_transaction(TransactionRequest::new("u1", 50.0, "m1", 0.0))
            .await
            .unwrap();

        // 0.3 + 0.1 * 0.9
        assert!((decision.response.fraud_score - 0.39).abs() < 1e-9);
        assert_eq!(decision.response.risk_factors, vec!["high_user_risk"]);
    }

    #[tokio::test]
    async fn test_ratio_uses_history() {
        let f = fixture();
        for _ in 0..3 {
            f.service
                .process_transaction(TransactionRequest::new("u1", 200.0, "m1", 0.0))
                .await
                .unwrap();
        }
        // Average 200, so 1100 is a ratio of 5.5
        let decision = f
            .service
            .process_transaction(TransactionRequest::new("u1", 1100.0, "m1", 0.0))
            .await
            .unwrap();
        assert!(decision
            .response
            .risk_factors
            .contains(&"unusual_amount_pattern".to_string()));
    }

    #[tokio::test]
    async fn test_batch_keeps_order_and_isolates_errors() {
        let f = fixture();
        let requests = vec![
            TransactionRequest::new("u1", 50.0, "m1", 0.1),
            TransactionRequest::new("", 50.0, "m1", 0.1),
            TransactionRequest::new("u2", 6000.0, "m2", 0.9).with_transaction_id("b-3"),
        ];

        let batch = f.service.process_batch(requests).await.unwrap();
        assert_eq!(batch.results.len(), 3);
        assert!(batch.results[0].is_ok());
        match &batch.results[1] {
            BatchItemResult::Error { code, error } => {
                assert_eq!(*code, 400);
                assert!(error.contains("user_id"));
            }
            other => panic!("expected error, got {:?}", other),
        }
        match &batch.results[2] {
            BatchItemResult::Ok(response) => assert_eq!(response.transaction_id, "b-3"),
            other => panic!("expected ok, got {:?}", other),
        }
        assert_eq!(f.store.transaction_count().await, 2);
    }

    #[tokio::test]
    async fn test_empty_batch_is_valid() {
        let f = fixture();
        let batch = f.service.process_batch(Vec::new()).await.unwrap();
        assert!(batch.results.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_batch_rejected() {
        let f = fixture();
        let service = IntakeService::new(f.store.clone(), f.cache.clone(), f.broker.clone())
            .with_batch_options(BatchOptions {
                max_size: 2,
                concurrency: 2,
            });
        let requests = vec![TransactionRequest::new("u1", 1.0, "m1", 0.0); 3];

        let err = service.process_batch(requests).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(f.store.transaction_count().await, 0);
    }

    #[tokio::test]
    async fn test_reads_report_not_found() {
        let f = fixture();
        assert!(matches!(
            f.service.get_transaction("missing").await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            f.service.get_user_risk("missing").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_health_reports_backends() {
        let f = fixture();
        let report = f.service.health().await;
        assert!(report.is_healthy());
    }
}
