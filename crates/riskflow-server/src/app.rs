//! Process wiring
//!
//! Builds the store, cache, event channel and scorer named by the
//! configuration, the intake service behind the router, and one feedback
//! processor task per consumer.

use crate::api::rest::{create_router, AppState};
use crate::config::{BrokerConfig, ServerConfig};
use anyhow::Result;
use axum::Router;
use riskflow_core::DECISION_TOPIC;
use riskflow_runtime::{
    Cache, EventConsumer, EventPublisher, FeedbackProcessor, InMemoryStore, IntakeService,
    MemoryBroker, MemoryCache, MetricsCollector, RemoteModel, Scorer, Store,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A wired RiskFlow process
pub struct App {
    router: Router,
    intake: Arc<IntakeService>,
    memory_broker: Option<Arc<MemoryBroker>>,
    shutdown: watch::Sender<bool>,
    processors: Vec<JoinHandle<()>>,
}

/// Publisher plus the consumers of the decision topic
struct Channel {
    publisher: Arc<dyn EventPublisher>,
    consumers: Vec<Box<dyn EventConsumer>>,
    memory: Option<Arc<MemoryBroker>>,
}

impl App {
    /// Connect every collaborator and start the feedback processors
    pub async fn build(config: &ServerConfig) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(MetricsCollector::with_defaults());
        let store = build_store(config).await?;
        let cache = build_cache(config).await?;
        let channel = build_channel(config)?;

        let scorer = match &config.scorer.remote_url {
            Some(url) => {
                info!(
                    endpoint = %url,
                    timeout_ms = config.scorer.timeout_ms,
                    "Using remote scoring model"
                );
                Scorer::with_primary(
                    Arc::new(RemoteModel::new(url.clone())),
                    config.scorer.timeout(),
                )
            }
            None => {
                info!("Using heuristic scoring");
                Scorer::heuristic()
            }
        };

        let intake = Arc::new(
            IntakeService::new(store.clone(), cache.clone(), channel.publisher.clone())
                .with_scorer(scorer)
                .with_metrics(metrics.clone())
                .with_batch_options(config.batch.options()),
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut processors = Vec::new();
        if config.processor.enabled {
            let processor = Arc::new(
                FeedbackProcessor::new(store, cache, channel.publisher.clone())
                    .with_metrics(metrics)
                    .with_options(config.processor.options()),
            );
            for mut consumer in channel.consumers {
                let processor = processor.clone();
                let shutdown_rx = shutdown_rx.clone();
                processors.push(tokio::spawn(async move {
                    processor.run(consumer.as_mut(), shutdown_rx).await;
                }));
            }
            info!(workers = processors.len(), "Feedback processors started");
        } else {
            warn!("Feedback processor disabled, decision events will not update risk");
        }

        let router = create_router(AppState::new(intake.clone()));

        Ok(Self {
            router,
            intake,
            memory_broker: channel.memory,
            shutdown,
            processors,
        })
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn intake(&self) -> &Arc<IntakeService> {
        &self.intake
    }

    /// The in-process broker, when the memory channel is configured
    pub fn memory_broker(&self) -> Option<&Arc<MemoryBroker>> {
        self.memory_broker.as_ref()
    }

    /// Stop the processors and wait for them to finish their current event
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Some(broker) = &self.memory_broker {
            broker.close();
        }
        for handle in self.processors {
            if let Err(e) = handle.await {
                warn!(error = %e, "Feedback processor task failed");
            }
        }
        info!("Shutdown complete");
    }
}

async fn build_store(config: &ServerConfig) -> Result<Arc<dyn Store>> {
    match &config.database_url {
        Some(url) => connect_postgres(url, config.database_max_connections).await,
        None => {
            info!("Using in-memory store");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

#[cfg(feature = "sqlx")]
async fn connect_postgres(url: &str, max_connections: u32) -> Result<Arc<dyn Store>> {
    use anyhow::Context;

    let store = riskflow_runtime::PostgresStore::connect(url, max_connections)
        .await
        .context("Failed to connect to PostgreSQL")?;
    store
        .migrate()
        .await
        .context("Failed to apply database schema")?;
    info!(max_connections, "Connected to PostgreSQL");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlx"))]
async fn connect_postgres(_url: &str, _max_connections: u32) -> Result<Arc<dyn Store>> {
    anyhow::bail!("database_url is set but the server was built without the `sqlx` feature")
}

async fn build_cache(config: &ServerConfig) -> Result<Arc<dyn Cache>> {
    match &config.redis_url {
        Some(url) => connect_redis(url).await,
        None => {
            info!("Using in-memory cache");
            Ok(Arc::new(MemoryCache::new()))
        }
    }
}

#[cfg(feature = "redis")]
async fn connect_redis(url: &str) -> Result<Arc<dyn Cache>> {
    use anyhow::Context;

    let cache = riskflow_runtime::RedisCache::connect(url)
        .await
        .context("Failed to connect to Redis")?;
    info!("Connected to Redis");
    Ok(Arc::new(cache))
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(_url: &str) -> Result<Arc<dyn Cache>> {
    anyhow::bail!("redis_url is set but the server was built without the `redis` feature")
}

fn build_channel(config: &ServerConfig) -> Result<Channel> {
    match &config.broker {
        BrokerConfig::Memory { partitions } => {
            let broker = Arc::new(MemoryBroker::new(*partitions));
            let consumers = if config.processor.enabled {
                broker
                    .consumers(DECISION_TOPIC)
                    .into_iter()
                    .map(|consumer| Box::new(consumer) as Box<dyn EventConsumer>)
                    .collect()
            } else {
                Vec::new()
            };
            info!(partitions, "Using in-memory event channel");
            Ok(Channel {
                publisher: broker.clone(),
                consumers,
                memory: Some(broker),
            })
        }
        BrokerConfig::Kafka {
            brokers,
            group_id,
            consumers,
        } => connect_kafka(config, brokers, group_id, *consumers),
    }
}

#[cfg(feature = "kafka")]
fn connect_kafka(
    config: &ServerConfig,
    brokers: &str,
    group_id: &str,
    count: usize,
) -> Result<Channel> {
    use anyhow::Context;
    use riskflow_runtime::{KafkaConsumer, KafkaPublisher};

    let publisher = KafkaPublisher::new(brokers).context("Failed to create Kafka producer")?;
    let mut consumers: Vec<Box<dyn EventConsumer>> = Vec::new();
    if config.processor.enabled {
        // Same group: the broker assigns each member a disjoint set of partitions
        for _ in 0..count {
            let consumer = KafkaConsumer::new(brokers, group_id, DECISION_TOPIC)
                .context("Failed to create Kafka consumer")?;
            consumers.push(Box::new(consumer));
        }
    }
    info!(brokers, group_id, consumers = count, "Using Kafka event channel");
    Ok(Channel {
        publisher: Arc::new(publisher),
        consumers,
        memory: None,
    })
}

#[cfg(not(feature = "kafka"))]
fn connect_kafka(
    _config: &ServerConfig,
    _brokers: &str,
    _group_id: &str,
    _count: usize,
) -> Result<Channel> {
    anyhow::bail!("broker type `kafka` requires the server to be built with the `kafka` feature")
}
