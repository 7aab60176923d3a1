//! Kafka connector backed by rdkafka's `StreamConsumer`.
//!
//! Partitions are assigned manually from the offset store so checkpoints
//! stay under `<zk_root>/<task_name>`. Acknowledged offsets are also
//! committed to the consumer group named after the task, and a partition
//! with no local checkpoint resumes from that group commit (earliest
//! retained offset when the group has none).

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::offsets::{self, OffsetStore, PartitionOffsets};
use super::{BrokerConnector, BrokerMessage, MessageConsumer, SourceSpec};
use crate::errors::{TopologyError, TopologyResult};
use crate::record::SourcePosition;

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct KafkaConnector {
    offsets: Arc<dyn OffsetStore>,
    overrides: BTreeMap<String, String>,
}

impl KafkaConnector {
    pub fn new(offsets: Arc<dyn OffsetStore>) -> Self {
        Self {
            offsets,
            overrides: BTreeMap::new(),
        }
    }

    /// Pass an extra librdkafka property through, e.g. `security.protocol`.
    pub fn with_property<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    fn client_config(&self, spec: &SourceSpec) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &spec.broker)
            .set("group.id", &spec.consumer_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest");
        for (key, value) in &self.overrides {
            config.set(key, value);
        }
        config
    }
}

fn broker_error(context: &str, e: rdkafka::error::KafkaError) -> TopologyError {
    TopologyError::broker(format!("{context}: {e}"))
}

#[async_trait]
impl BrokerConnector for KafkaConnector {
    fn kind(&self) -> &'static str {
        "kafka"
    }

    async fn connect(&self, spec: &SourceSpec) -> TopologyResult<Box<dyn MessageConsumer>> {
        let consumer: StreamConsumer = self
            .client_config(spec)
            .create()
            .map_err(|e| broker_error("failed to create consumer", e))?;

        let topic = spec.topic.clone();
        let (consumer, partitions) = tokio::task::spawn_blocking(move || {
            let metadata = consumer
                .fetch_metadata(Some(&topic), METADATA_TIMEOUT)
                .map_err(|e| broker_error("failed to fetch topic metadata", e))?;
            let partitions: Vec<i32> = metadata
                .topics()
                .iter()
                .filter(|t| t.name() == topic)
                .flat_map(|t| t.partitions().iter().map(|p| p.id()))
                .collect();
            Ok::<_, TopologyError>((consumer, partitions))
        })
        .await
        .map_err(|e| TopologyError::broker(format!("metadata task failed: {e}")))??;

        if partitions.is_empty() {
            return Err(TopologyError::broker(format!(
                "topic '{}' has no partitions on {}",
                spec.topic, spec.broker
            )));
        }

        let namespace = spec.offset_namespace();
        let committed = self.offsets.load(&namespace).await?;

        let mut assignment = TopicPartitionList::new();
        for partition in &partitions {
            let offset = committed
                .get(partition)
                .map_or(Offset::Stored, |next| Offset::Offset(*next));
            assignment
                .add_partition_offset(&spec.topic, *partition, offset)
                .map_err(|e| broker_error("invalid partition assignment", e))?;
        }
        consumer
            .assign(&assignment)
            .map_err(|e| broker_error("failed to assign partitions", e))?;

        info!(
            topic = %spec.topic,
            partitions = partitions.len(),
            "Kafka consumer assigned from checkpoint {}",
            namespace
        );

        Ok(Box::new(KafkaConsumer {
            consumer,
            offsets: Arc::clone(&self.offsets),
            topic: spec.topic.clone(),
            namespace,
            committed,
        }))
    }
}

/// Next-to-read offsets in the form the group coordinator stores them.
fn group_commit_list(topic: &str, offsets: &PartitionOffsets) -> TopologyResult<TopicPartitionList> {
    let mut list = TopicPartitionList::new();
    for (partition, next) in offsets {
        list.add_partition_offset(topic, *partition, Offset::Offset(*next))
            .map_err(|e| broker_error("invalid commit offset", e))?;
    }
    Ok(list)
}

struct KafkaConsumer {
    consumer: StreamConsumer,
    offsets: Arc<dyn OffsetStore>,
    topic: String,
    namespace: String,
    committed: PartitionOffsets,
}

impl std::fmt::Debug for KafkaConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaConsumer")
            .field("topic", &self.topic)
            .field("namespace", &self.namespace)
            .field("committed", &self.committed)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MessageConsumer for KafkaConsumer {
    async fn poll(
        &mut self,
        max: usize,
        timeout: Duration,
    ) -> TopologyResult<Option<Vec<BrokerMessage>>> {
        let deadline = Instant::now() + timeout;
        let mut batch = Vec::with_capacity(max.min(1024));

        while batch.len() < max {
            let received = match tokio::time::timeout_at(deadline, self.consumer.recv()).await {
                Ok(received) => received,
                Err(_) => break,
            };
            let message = received.map_err(|e| broker_error("receive failed", e))?;
            batch.push(BrokerMessage {
                partition: message.partition(),
                offset: message.offset(),
                payload: message.payload().map(Bytes::copy_from_slice).unwrap_or_default(),
            });
        }

        Ok(Some(batch))
    }

    async fn commit(&mut self, positions: &[SourcePosition]) -> TopologyResult<()> {
        if !offsets::advance(&mut self.committed, positions) {
            return Ok(());
        }
        self.offsets.store(&self.namespace, &self.committed).await?;

        let group_offsets = group_commit_list(&self.topic, &self.committed)?;
        self.consumer
            .commit(&group_offsets, CommitMode::Async)
            .map_err(|e| broker_error("failed to commit group offsets", e))?;
        debug!("Kafka offsets for {} now {:?}", self.namespace, self.committed);
        Ok(())
    }

    async fn close(&mut self) -> TopologyResult<()> {
        if let Err(e) = self.consumer.unassign() {
            warn!("Failed to unassign Kafka partitions: {}", e);
        }
        Ok(())
    }
}
