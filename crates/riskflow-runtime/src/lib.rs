//! RiskFlow Runtime - Transaction intake and risk feedback pipeline
//!
//! This crate wires the domain rules from `riskflow-core` to the external
//! collaborators the pipeline depends on:
//! - `store`: durable users, transactions, alerts and feature history
//! - `cache`: TTL key-value cache for replayed responses and recency lists
//! - `channel`: partitioned at-least-once event channel
//! - `scoring`: pluggable scoring models with timeout and heuristic fallback
//! - `intake`: the synchronous scoring service
//! - `feedback`: the asynchronous decision-event consumer

pub mod cache;
pub mod channel;
pub mod error;
pub mod feedback;
pub mod intake;
pub mod observability;
pub mod scoring;
pub mod store;

// Re-export main types
pub use cache::{Cache, MemoryCache};
pub use channel::{notify, Delivery, EventConsumer, EventPublisher, MemoryBroker, MemoryConsumer};
pub use error::{CacheError, ChannelError, ProcessorError, ScoringError, ServiceError, StoreError};
pub use feedback::{FeedbackOptions, FeedbackOutcome, FeedbackProcessor, FeedbackReport};
pub use intake::{BatchOptions, Decision, HealthReport, IntakeService};
pub use observability::{Counter, Histogram, Metrics, MetricsCollector, MetricsSnapshot};
pub use scoring::{HeuristicModel, RemoteModel, ScoreSource, Scored, Scorer, ScoringModel};
pub use store::{AlertInsert, InMemoryStore, RiskUpdate, Store};

#[cfg(feature = "sqlx")]
pub use store::PostgresStore;

#[cfg(feature = "redis")]
pub use cache::RedisCache;

#[cfg(feature = "kafka")]
pub use channel::{KafkaConsumer, KafkaPublisher};
