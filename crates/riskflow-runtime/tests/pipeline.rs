//! End-to-end tests: intake through the event channel into the feedback
//! processor, all on in-memory backends.

use riskflow_core::keys::recent_transactions_key;
use riskflow_core::{
    AlertStatus, ScoringInput, ScoringOutput, TransactionRequest, DECISION_TOPIC, FRAUD_THRESHOLD,
};
use riskflow_runtime::observability::names;
use riskflow_runtime::{
    Cache, EventPublisher, FeedbackOptions, FeedbackProcessor, InMemoryStore, IntakeService,
    MemoryBroker, MemoryCache, Metrics, MetricsCollector, Scorer, ScoringError, ScoringModel,
    Store,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

struct Pipeline {
    store: Arc<InMemoryStore>,
    cache: Arc<MemoryCache>,
    broker: Arc<MemoryBroker>,
    metrics: Arc<MetricsCollector>,
    intake: IntakeService,
    processor: Arc<FeedbackProcessor>,
}

fn pipeline(partitions: usize) -> Pipeline {
    let store = Arc::new(InMemoryStore::new());
    let cache = Arc::new(MemoryCache::new());
    let broker = Arc::new(MemoryBroker::new(partitions));
    let metrics = Arc::new(MetricsCollector::with_defaults());

    let intake = IntakeService::new(store.clone(), cache.clone(), broker.clone())
        .with_metrics(metrics.clone());
    let processor = Arc::new(
        FeedbackProcessor::new(store.clone(), cache.clone(), broker.clone())
            .with_metrics(metrics.clone())
            .with_options(FeedbackOptions {
                max_attempts: 3,
                retry_backoff: Duration::from_millis(1),
            }),
    );

    Pipeline {
        store,
        cache,
        broker,
        metrics,
        intake,
        processor,
    }
}

/// Run one processor per partition until the broker is drained and closed
async fn drain(p: &Pipeline) {
    p.broker.close();
    let (_tx, rx) = watch::channel(false);
    let mut handles = Vec::new();
    for mut consumer in p.broker.consumers(DECISION_TOPIC) {
        let processor = p.processor.clone();
        let rx = rx.clone();
        handles.push(tokio::spawn(async move {
            processor.run(&mut consumer, rx).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_flagged_transaction_yields_one_open_alert() {
    let p = pipeline(4);
    let request = TransactionRequest::new("u1", 6000.0, "m1", 0.9).with_transaction_id("tx-fraud");

    let decision = p.intake.process_transaction(request.clone()).await.unwrap();
    assert!(decision.response.fraud_score > FRAUD_THRESHOLD);
    // Client retry within the TTL is a replay, not a second event
    p.intake.process_transaction(request).await.unwrap();

    // Simulate broker redelivery of the same decision event
    let published = p.broker.published(DECISION_TOPIC);
    assert_eq!(published.len(), 1);
    p.broker
        .publish(DECISION_TOPIC, published[0].key.as_deref(), published[0].payload.clone())
        .await
        .unwrap();

    drain(&p).await;

    let alerts = p.store.list_alerts(AlertStatus::Open, 100).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].transaction_id, "tx-fraud");
    assert_eq!(p.metrics.counter(names::FEEDBACK_PROCESSED).get(), 2);
    assert_eq!(p.metrics.counter(names::ALERTS_CREATED).get(), 1);

    // 0.5 + 0.1 + 0.05 + 0.03, applied once
    let user = p.store.get_user("u1").await.unwrap().unwrap();
    assert!((user.risk_score - 0.68).abs() < 1e-9);
}

#[tokio::test]
async fn test_risk_stays_bounded_over_many_events() {
    let p = pipeline(2);
    for i in 0..40 {
        p.intake
            .process_transaction(
                TransactionRequest::new("heavy", 9000.0, "m1", 1.0)
                    .with_transaction_id(format!("h{}", i)),
            )
            .await
            .unwrap();
        p.intake
            .process_transaction(TransactionRequest::new("light", 1.0, "m1", 0.0))
            .await
            .unwrap();
    }
    drain(&p).await;

    let heavy = p.store.get_user("heavy").await.unwrap().unwrap();
    let light = p.store.get_user("light").await.unwrap().unwrap();
    assert_eq!(heavy.risk_score, 1.0);
    assert!((0.0..=1.0).contains(&light.risk_score));

    let recent = p.cache.recent(&recent_transactions_key("heavy")).await.unwrap();
    assert_eq!(recent.len(), 10);
    assert_eq!(recent[0], "h39");
    assert_eq!(recent[9], "h30");
}

#[tokio::test]
async fn test_user_risk_feeds_back_into_scoring() {
    let p = pipeline(1);
    for i in 0..5 {
        p.intake
            .process_transaction(
                TransactionRequest::new("u9", 6000.0, "m1", 0.9)
                    .with_transaction_id(format!("f{}", i)),
            )
            .await
            .unwrap();
    }
    drain(&p).await;

    // Cached risk is now high enough to add the user factor
    let decision = p
        .intake
        .process_transaction(TransactionRequest::new("u9", 10.0, "m1", 0.0))
        .await
        .unwrap();
    assert!(decision
        .response
        .risk_factors
        .contains(&"high_user_risk".to_string()));
}

struct HangingModel;

#[async_trait::async_trait]
impl ScoringModel for HangingModel {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn score(&self, _input: &ScoringInput) -> Result<ScoringOutput, ScoringError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_remote_timeout_falls_back_to_heuristic() {
    let p = pipeline(1);
    let timeout = Duration::from_millis(100);
    let intake = IntakeService::new(p.store.clone(), p.cache.clone(), p.broker.clone())
        .with_metrics(p.metrics.clone())
        .with_scorer(Scorer::with_primary(Arc::new(HangingModel), timeout));

    let started = std::time::Instant::now();
    let decision = intake
        .process_transaction(TransactionRequest::new("u1", 50.0, "m1", 0.1))
        .await
        .unwrap();

    assert!(started.elapsed() < timeout + Duration::from_secs(1));
    // Heuristic: 0.3 + 0.02 + 0.05
    assert!((decision.response.fraud_score - 0.37).abs() < 1e-9);
    assert_eq!(decision.response.confidence, 0.8);
    assert_eq!(p.metrics.counter(names::SCORER_FALLBACKS).get(), 1);
}

#[tokio::test]
async fn test_events_for_one_user_stay_on_one_partition() {
    let p = pipeline(8);
    for _ in 0..10 {
        p.intake
            .process_transaction(TransactionRequest::new("same-user", 10.0, "m1", 0.0))
            .await
            .unwrap();
    }
    let partitions: std::collections::HashSet<i32> = p
        .broker
        .published(DECISION_TOPIC)
        .iter()
        .map(|d| d.partition)
        .collect();
    assert_eq!(partitions.len(), 1);
}
