//! Kafka-backed event channel

use super::{Delivery, EventConsumer, EventPublisher};
use crate::error::{ChannelError, ChannelResult};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use rdkafka::Message;
use std::collections::HashMap;
use std::time::Duration;

const SEND_TIMEOUT: Duration = Duration::from_secs(3);
const SEEK_TIMEOUT: Duration = Duration::from_secs(2);

/// Kafka producer
pub struct KafkaPublisher {
    producer: FutureProducer,
}

impl KafkaPublisher {
    pub fn new(brokers: &str) -> ChannelResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| ChannelError::Publish(format!("failed to create producer: {}", e)))?;
        Ok(Self { producer })
    }
}

#[async_trait::async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(&self, topic: &str, key: Option<&str>, payload: Vec<u8>) -> ChannelResult<()> {
        let mut record = FutureRecord::<str, [u8]>::to(topic).payload(payload.as_slice());
        if let Some(key) = key {
            record = record.key(key);
        }

        self.producer
            .send(record, Timeout::After(SEND_TIMEOUT))
            .await
            .map_err(|(e, _)| ChannelError::Publish(e.to_string()))?;
        Ok(())
    }
}

/// Kafka consumer with manual offset commits.
///
/// `nack` seeks the partition back to the message so the broker redelivers
/// it; redelivery attempts are tracked per partition/offset in this process.
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    attempts: HashMap<(String, i32, i64), u32>,
}

impl KafkaConsumer {
    pub fn new(brokers: &str, group_id: &str, topic: &str) -> ChannelResult<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", group_id)
            .set("bootstrap.servers", brokers)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| ChannelError::Consume(format!("failed to create consumer: {}", e)))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| ChannelError::Consume(format!("failed to subscribe to {}: {}", topic, e)))?;

        Ok(Self {
            consumer,
            attempts: HashMap::new(),
        })
    }
}

#[async_trait::async_trait]
impl EventConsumer for KafkaConsumer {
    async fn poll(&mut self) -> ChannelResult<Option<Delivery>> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| ChannelError::Consume(e.to_string()))?;

        let topic = message.topic().to_string();
        let partition = message.partition();
        let offset = message.offset();

        let attempt = self
            .attempts
            .entry((topic.clone(), partition, offset))
            .or_insert(0);
        *attempt += 1;

        Ok(Some(Delivery {
            topic,
            partition,
            offset,
            key: message
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            attempt: *attempt,
        }))
    }

    async fn ack(&mut self, delivery: &Delivery) -> ChannelResult<()> {
        self.attempts
            .remove(&(delivery.topic.clone(), delivery.partition, delivery.offset));

        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &delivery.topic,
                delivery.partition,
                Offset::Offset(delivery.offset + 1),
            )
            .map_err(|e| ChannelError::Commit(e.to_string()))?;

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| ChannelError::Commit(e.to_string()))
    }

    async fn nack(&mut self, delivery: Delivery) -> ChannelResult<()> {
        self.consumer
            .seek(
                &delivery.topic,
                delivery.partition,
                Offset::Offset(delivery.offset),
                Timeout::After(SEEK_TIMEOUT),
            )
            .map_err(|e| ChannelError::Consume(format!("seek failed: {}", e)))
    }
}
