//! Event channel
//!
//! Partitioned, at-least-once publish/subscribe transport. Messages with the
//! same key always land on the same partition, and each partition is consumed
//! in order by a single consumer.
//!
//! Two delivery contracts sit on top of it:
//! - intake and alert publication use [`notify`]: at-most-once, a failure is
//!   logged and reported to the caller but never propagated
//! - the feedback processor consumes with explicit `ack`/`nack`, so an event
//!   is redelivered until it has been handled

#[cfg(feature = "kafka")]
mod kafka;
mod memory;

#[cfg(feature = "kafka")]
pub use kafka::{KafkaConsumer, KafkaPublisher};
pub use memory::{MemoryBroker, MemoryConsumer};

use crate::error::ChannelResult;
use serde::Serialize;
use tracing::warn;

/// One message handed to a consumer
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    /// 1 on first delivery, incremented on every redelivery
    pub attempt: u32,
}

/// Trait for message producers
#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: Option<&str>, payload: Vec<u8>) -> ChannelResult<()>;
}

/// Trait for message consumers bound to one subscription
#[async_trait::async_trait]
pub trait EventConsumer: Send {
    /// Wait for the next delivery. `None` means the channel was closed.
    async fn poll(&mut self) -> ChannelResult<Option<Delivery>>;

    /// Mark a delivery as handled
    async fn ack(&mut self, delivery: &Delivery) -> ChannelResult<()>;

    /// Hand a delivery back for redelivery
    async fn nack(&mut self, delivery: Delivery) -> ChannelResult<()>;
}

/// Publish `event` as JSON with at-most-once semantics.
///
/// Returns `false` when encoding or publishing failed. The failure is logged
/// here; callers only count it.
pub async fn notify<T: Serialize + Sync>(
    publisher: &dyn EventPublisher,
    topic: &str,
    key: Option<&str>,
    event: &T,
) -> bool {
    let payload = match serde_json::to_vec(event) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(topic, error = %e, "Failed to encode event");
            return false;
        }
    };

    match publisher.publish(topic, key, payload).await {
        Ok(()) => true,
        Err(e) => {
            warn!(topic, key = ?key, error = %e, "Event notification dropped");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelError;

    struct FailingPublisher;

    #[async_trait::async_trait]
    impl EventPublisher for FailingPublisher {
        async fn publish(&self, _topic: &str, _key: Option<&str>, _payload: Vec<u8>) -> ChannelResult<()> {
            Err(ChannelError::Publish("broker unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_notify_swallows_publish_failure() {
        let delivered = notify(&FailingPublisher, "topic", Some("k"), &serde_json::json!({"a": 1})).await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn test_notify_publishes_json() {
        let broker = MemoryBroker::new(1);
        let delivered = notify(&broker, "topic", Some("k"), &serde_json::json!({"a": 1})).await;
        assert!(delivered);

        let published = broker.published("topic");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].key.as_deref(), Some("k"));
        let value: serde_json::Value = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(value["a"], 1);
    }
}
