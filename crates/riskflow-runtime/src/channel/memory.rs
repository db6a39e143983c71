//! In-memory broker
//!
//! A process-local stand-in for a partitioned log. Pending messages are
//! consumed from a queue per partition; a bounded history of everything
//! published is kept for inspection.
//!
//! Both queues are capped at the broker's retention. Like log retention on a
//! real broker, the oldest unconsumed message is dropped once a partition is
//! full, so topics nobody consumes (alerts, dead letters) stay bounded.

use super::{Delivery, EventConsumer, EventPublisher};
use crate::error::{ChannelError, ChannelResult};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::debug;

/// Messages kept per partition, pending and history alike
const DEFAULT_RETENTION: usize = 10_000;

#[derive(Default)]
struct PartitionState {
    pending: VecDeque<Delivery>,
    history: VecDeque<Delivery>,
    next_offset: i64,
    dropped: u64,
}

#[derive(Default)]
struct Partition {
    state: Mutex<PartitionState>,
    notify: Notify,
}

impl Partition {
    fn lock(&self) -> MutexGuard<'_, PartitionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct Topic {
    partitions: Vec<Arc<Partition>>,
    round_robin: AtomicUsize,
}

impl Topic {
    fn new(partitions: usize) -> Self {
        Self {
            partitions: (0..partitions).map(|_| Arc::new(Partition::default())).collect(),
            round_robin: AtomicUsize::new(0),
        }
    }

    fn partition_for(&self, key: Option<&str>) -> usize {
        let n = self.partitions.len();
        match key {
            Some(key) => (fnv1a(key.as_bytes()) % n as u64) as usize,
            None => self.round_robin.fetch_add(1, Ordering::Relaxed) % n,
        }
    }
}

/// FNV-1a, stable across processes and releases
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// In-memory partitioned broker
pub struct MemoryBroker {
    partitions: usize,
    retention: usize,
    topics: Mutex<HashMap<String, Arc<Topic>>>,
    closed: Arc<AtomicBool>,
}

impl MemoryBroker {
    /// Create a broker whose topics have `partitions` partitions (at least 1)
    pub fn new(partitions: usize) -> Self {
        Self::with_retention(partitions, DEFAULT_RETENTION)
    }

    /// Keep at most `retention` messages (at least 1) per partition
    pub fn with_retention(partitions: usize, retention: usize) -> Self {
        Self {
            partitions: partitions.max(1),
            retention: retention.max(1),
            topics: Mutex::new(HashMap::new()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    fn topic(&self, name: &str) -> Arc<Topic> {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Topic::new(self.partitions)))
            .clone()
    }

    /// One consumer per partition of `topic`
    pub fn consumers(&self, topic: &str) -> Vec<MemoryConsumer> {
        let topic_handle = self.topic(topic);
        topic_handle
            .partitions
            .iter()
            .enumerate()
            .map(|(index, partition)| MemoryConsumer {
                partition_index: index as i32,
                partition: partition.clone(),
                closed: self.closed.clone(),
            })
            .collect()
    }

    /// Stop all consumers once their pending messages are drained
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        for topic in topics.values() {
            for partition in &topic.partitions {
                partition.notify.notify_waiters();
            }
        }
    }

    /// Everything published to `topic`, per partition in offset order
    pub fn published(&self, topic: &str) -> Vec<Delivery> {
        self.topic(topic)
            .partitions
            .iter()
            .flat_map(|p| p.lock().history.iter().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Messages waiting to be consumed on `topic`
    pub fn pending(&self, topic: &str) -> usize {
        self.topic(topic)
            .partitions
            .iter()
            .map(|p| p.lock().pending.len())
            .sum()
    }

    /// Unconsumed messages discarded by retention on `topic`
    pub fn dropped(&self, topic: &str) -> u64 {
        self.topic(topic)
            .partitions
            .iter()
            .map(|p| p.lock().dropped)
            .sum()
    }

    /// Partition a key routes to
    pub fn partition_of(&self, topic: &str, key: &str) -> i32 {
        self.topic(topic).partition_for(Some(key)) as i32
    }
}

#[async_trait::async_trait]
impl EventPublisher for MemoryBroker {
    async fn publish(&self, topic: &str, key: Option<&str>, payload: Vec<u8>) -> ChannelResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Publish("broker is closed".to_string()));
        }

        let topic_handle = self.topic(topic);
        let index = topic_handle.partition_for(key);
        let partition = &topic_handle.partitions[index];

        {
            let mut state = partition.lock();
            let delivery = Delivery {
                topic: topic.to_string(),
                partition: index as i32,
                offset: state.next_offset,
                key: key.map(str::to_string),
                payload,
                attempt: 0,
            };
            state.next_offset += 1;
            state.history.push_back(delivery.clone());
            if state.history.len() > self.retention {
                state.history.pop_front();
            }
            state.pending.push_back(delivery);
            if state.pending.len() > self.retention {
                if let Some(expired) = state.pending.pop_front() {
                    state.dropped += 1;
                    debug!(
                        topic = %expired.topic,
                        partition = expired.partition,
                        offset = expired.offset,
                        "Retention reached, dropping oldest unconsumed message"
                    );
                }
            }
        }

        partition.notify.notify_one();
        Ok(())
    }
}

/// Consumer bound to one partition of a [`MemoryBroker`] topic
pub struct MemoryConsumer {
    partition_index: i32,
    partition: Arc<Partition>,
    closed: Arc<AtomicBool>,
}

impl MemoryConsumer {
    pub fn partition(&self) -> i32 {
        self.partition_index
    }
}

#[async_trait::async_trait]
impl EventConsumer for MemoryConsumer {
    async fn poll(&mut self) -> ChannelResult<Option<Delivery>> {
        loop {
            let notified = self.partition.notify.notified();
            {
                let mut state = self.partition.lock();
                if let Some(mut delivery) = state.pending.pop_front() {
                    delivery.attempt += 1;
                    return Ok(Some(delivery));
                }
            }
            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            notified.await;
        }
    }

    async fn ack(&mut self, _delivery: &Delivery) -> ChannelResult<()> {
        Ok(())
    }

    async fn nack(&mut self, delivery: Delivery) -> ChannelResult<()> {
        self.partition.lock().pending.push_front(delivery);
        self.partition.notify.notify_one();
        Ok(())
    }
}
