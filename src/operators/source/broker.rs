//! In-process broker with partitioned topics and pluggable offset storage.
//!
//! Used for local development runs and tests. A topic can be closed, after
//! which consumers that have caught up see the end of the stream.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use super::offsets::{self, MemoryOffsetStore, OffsetStore, PartitionOffsets};
use super::{BrokerConnector, BrokerMessage, MessageConsumer, SourceSpec};
use crate::errors::{TopologyError, TopologyResult};
use crate::record::SourcePosition;

#[derive(Debug, Default)]
struct TopicLog {
    partitions: Vec<Vec<Bytes>>,
    closed: bool,
}

impl TopicLog {
    fn with_partitions(count: usize) -> Self {
        Self {
            partitions: vec![Vec::new(); count.max(1)],
            closed: false,
        }
    }
}

#[derive(Debug)]
struct BrokerState {
    topics: Mutex<HashMap<String, TopicLog>>,
    appended: Notify,
    offsets: Arc<dyn OffsetStore>,
}

/// Cloneable handle to a shared in-memory broker.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_offset_store(Arc::new(MemoryOffsetStore::default()))
    }

    pub fn with_offset_store(offsets: Arc<dyn OffsetStore>) -> Self {
        Self {
            state: Arc::new(BrokerState {
                topics: Mutex::new(HashMap::new()),
                appended: Notify::new(),
                offsets,
            }),
        }
    }

    pub fn offset_store(&self) -> Arc<dyn OffsetStore> {
        Arc::clone(&self.state.offsets)
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<String, TopicLog>> {
        self.state
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a topic with `partitions` partitions. Existing topics are kept.
    pub fn create_topic(&self, topic: &str, partitions: usize) {
        self.topics()
            .entry(topic.to_string())
            .or_insert_with(|| TopicLog::with_partitions(partitions));
    }

    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics().keys().cloned().collect();
        names.sort();
        names
    }

    /// Append to partition 0, creating the topic if needed. Returns the offset.
    pub fn publish(&self, topic: &str, payload: Bytes) -> i64 {
        self.publish_to(topic, 0, payload)
    }

    /// Append to a specific partition, growing the topic to cover it.
    pub fn publish_to(&self, topic: &str, partition: usize, payload: Bytes) -> i64 {
        let offset = {
            let mut topics = self.topics();
            let log = topics
                .entry(topic.to_string())
                .or_insert_with(|| TopicLog::with_partitions(partition + 1));
            if log.partitions.len() <= partition {
                log.partitions.resize_with(partition + 1, Vec::new);
            }
            let messages = &mut log.partitions[partition];
            messages.push(payload);
            messages.len() as i64 - 1
        };
        self.state.appended.notify_waiters();
        offset
    }

    /// Mark a topic complete; caught-up consumers then see end of stream.
    pub fn close_topic(&self, topic: &str) {
        self.topics()
            .entry(topic.to_string())
            .or_insert_with(|| TopicLog::with_partitions(1))
            .closed = true;
        self.state.appended.notify_waiters();
    }

    pub fn message_count(&self, topic: &str) -> usize {
        self.topics()
            .get(topic)
            .map(|log| log.partitions.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Read what is available from `positions`, advancing them.
    fn fetch(
        &self,
        topic: &str,
        positions: &mut PartitionOffsets,
        max: usize,
    ) -> TopologyResult<Fetch> {
        let topics = self.topics();
        let log = topics
            .get(topic)
            .ok_or_else(|| TopologyError::broker(format!("topic '{topic}' was deleted")))?;

        let mut batch = Vec::new();
        for (partition, messages) in log.partitions.iter().enumerate() {
            let partition = partition as i32;
            let next = positions.entry(partition).or_insert(0);
            while batch.len() < max {
                let Some(payload) = usize::try_from(*next).ok().and_then(|i| messages.get(i)) else {
                    break;
                };
                batch.push(BrokerMessage {
                    partition,
                    offset: *next,
                    payload: payload.clone(),
                });
                *next += 1;
            }
        }

        if !batch.is_empty() {
            return Ok(Fetch::Messages(batch));
        }
        if log.closed {
            return Ok(Fetch::Exhausted);
        }
        Ok(Fetch::Empty)
    }
}

enum Fetch {
    Messages(Vec<BrokerMessage>),
    Empty,
    Exhausted,
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self, spec: &SourceSpec) -> TopologyResult<Box<dyn MessageConsumer>> {
        self.create_topic(&spec.topic, 1);
        let namespace = spec.offset_namespace();
        let committed = self.state.offsets.load(&namespace).await?;
        debug!(
            "Memory consumer for '{}' resuming at {:?} ({})",
            spec.topic, committed, namespace
        );

        Ok(Box::new(MemoryConsumer {
            broker: self.clone(),
            topic: spec.topic.clone(),
            namespace,
            read_positions: committed.clone(),
            committed,
        }))
    }
}

#[derive(Debug)]
struct MemoryConsumer {
    broker: MemoryBroker,
    topic: String,
    namespace: String,
    read_positions: PartitionOffsets,
    committed: PartitionOffsets,
}

#[async_trait]
impl MessageConsumer for MemoryConsumer {
    async fn poll(
        &mut self,
        max: usize,
        timeout: Duration,
    ) -> TopologyResult<Option<Vec<BrokerMessage>>> {
        let deadline = Instant::now() + timeout;
        loop {
            let appended = self.broker.state.appended.notified();
            match self.broker.fetch(&self.topic, &mut self.read_positions, max)? {
                Fetch::Messages(batch) => return Ok(Some(batch)),
                Fetch::Exhausted => return Ok(None),
                Fetch::Empty => {}
            }
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(Some(Vec::new()));
            }
        }
    }

    async fn commit(&mut self, positions: &[SourcePosition]) -> TopologyResult<()> {
        if offsets::advance(&mut self.committed, positions) {
            self.broker
                .state
                .offsets
                .store(&self.namespace, &self.committed)
                .await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> TopologyResult<()> {
        Ok(())
    }
}
