//! Message-queue ingestion.
//!
//! [`MessageSource`] is the source operator. It is bound to a
//! [`SourceSpec`] at build time and only reaches the broker, through its
//! [`BrokerConnector`], when the engine opens it.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{OperatorContext, SourceOperator};
use crate::config::defaults::{DEFAULT_POLL_BATCH_SIZE, DEFAULT_POLL_TIMEOUT};
use crate::config::duration_serde::as_humantime;
use crate::config::{PipelineConfig, keys};
use crate::errors::{TopologyError, TopologyResult};
use crate::record::{Record, SourcePosition};

pub mod broker;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod offsets;

pub use broker::MemoryBroker;
#[cfg(feature = "kafka")]
pub use kafka::KafkaConnector;
pub use offsets::{FileOffsetStore, MemoryOffsetStore, OffsetStore, PartitionOffsets};

/// Everything the source needs to find its messages and checkpoint them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSpec {
    /// Broker locator, a `host:port` list
    pub broker: String,
    pub topic: String,
    /// Coordination root under which offsets are checkpointed
    pub zk_root: String,
    /// Consumer group; also the topology name
    pub consumer_id: String,
    pub poll_batch_size: usize,
    #[serde(serialize_with = "as_humantime")]
    pub poll_timeout: Duration,
}

impl SourceSpec {
    pub fn from_config(config: &PipelineConfig) -> TopologyResult<Self> {
        let poll_batch_size = config.parse_or(keys::POLL_BATCH_SIZE, DEFAULT_POLL_BATCH_SIZE)?;
        if poll_batch_size == 0 {
            return Err(TopologyError::invalid_value(
                keys::POLL_BATCH_SIZE,
                "0",
                "batch size must be at least 1",
            ));
        }

        Ok(Self {
            broker: config.require(keys::ZK_HOSTS_PORT)?.to_string(),
            topic: config.require(keys::KAFKA_TOPIC)?.to_string(),
            zk_root: config.require(keys::ZK_ROOT)?.to_string(),
            consumer_id: config.require(keys::TASK_NAME)?.to_string(),
            poll_batch_size,
            poll_timeout: config.duration_or(keys::POLL_TIMEOUT, DEFAULT_POLL_TIMEOUT)?,
        })
    }

    /// Path under which this consumer's offsets live: `<zk_root>/<consumer_id>`.
    pub fn offset_namespace(&self) -> String {
        format!("{}/{}", self.zk_root.trim_end_matches('/'), self.consumer_id)
    }
}

/// A raw message as delivered by a broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub partition: i32,
    pub offset: i64,
    pub payload: Bytes,
}

/// Opens consumers for a broker technology.
#[async_trait]
pub trait BrokerConnector: Send + Sync + Debug {
    fn kind(&self) -> &'static str;

    async fn connect(&self, spec: &SourceSpec) -> TopologyResult<Box<dyn MessageConsumer>>;
}

/// A live subscription to one topic, positioned at the committed offsets.
#[async_trait]
pub trait MessageConsumer: Send + Debug {
    /// Up to `max` messages, waiting at most `timeout` for the first one.
    ///
    /// `Ok(None)` means the topic is exhausted and will never yield more.
    async fn poll(
        &mut self,
        max: usize,
        timeout: Duration,
    ) -> TopologyResult<Option<Vec<BrokerMessage>>>;

    /// Checkpoint acknowledged positions.
    async fn commit(&mut self, positions: &[SourcePosition]) -> TopologyResult<()>;

    async fn close(&mut self) -> TopologyResult<()>;
}

/// Source operator reading opaque text payloads from a topic.
#[derive(Debug)]
pub struct MessageSource {
    name: String,
    spec: SourceSpec,
    connector: Arc<dyn BrokerConnector>,
    consumer: Option<Box<dyn MessageConsumer>>,
}

impl MessageSource {
    pub fn new(spec: SourceSpec, connector: Arc<dyn BrokerConnector>) -> Self {
        Self {
            name: "source".to_string(),
            spec,
            connector,
            consumer: None,
        }
    }

    pub fn from_config(
        config: &PipelineConfig,
        connector: Arc<dyn BrokerConnector>,
    ) -> TopologyResult<Self> {
        Ok(Self::new(SourceSpec::from_config(config)?, connector))
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn source_spec(&self) -> &SourceSpec {
        &self.spec
    }

    fn consumer(&mut self) -> TopologyResult<&mut Box<dyn MessageConsumer>> {
        self.consumer
            .as_mut()
            .ok_or_else(|| TopologyError::illegal_state("source used before open"))
    }
}

#[async_trait]
impl SourceOperator for MessageSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn spec(&self) -> serde_json::Value {
        serde_json::json!({
            "operator": "message_source",
            "connector": self.connector.kind(),
            "broker": self.spec.broker,
            "topic": self.spec.topic,
            "zk_root": self.spec.zk_root,
            "consumer_id": self.spec.consumer_id,
            "offset_namespace": self.spec.offset_namespace(),
            "poll_batch_size": self.spec.poll_batch_size,
            "poll_timeout": humantime::format_duration(self.spec.poll_timeout).to_string(),
        })
    }

    async fn open(&mut self, context: &OperatorContext) -> TopologyResult<()> {
        let consumer = self.connector.connect(&self.spec).await?;
        self.consumer = Some(consumer);
        info!(
            topology = %context.topology,
            topic = %self.spec.topic,
            group = %self.spec.consumer_id,
            "Source '{}' subscribed via {} connector",
            self.name,
            self.connector.kind()
        );
        Ok(())
    }

    async fn next_batch(&mut self) -> TopologyResult<Option<Vec<Record>>> {
        let (max, timeout) = (self.spec.poll_batch_size, self.spec.poll_timeout);
        let Some(messages) = self.consumer()?.poll(max, timeout).await? else {
            return Ok(None);
        };

        Ok(Some(
            messages
                .into_iter()
                .map(|message| {
                    Record::text(String::from_utf8_lossy(&message.payload))
                        .with_position(SourcePosition::new(message.partition, message.offset))
                })
                .collect(),
        ))
    }

    async fn commit(&mut self, positions: &[SourcePosition]) -> TopologyResult<()> {
        if positions.is_empty() {
            return Ok(());
        }
        self.consumer()?.commit(positions).await?;
        debug!("Source '{}' committed {} positions", self.name, positions.len());
        Ok(())
    }

    async fn close(&mut self) -> TopologyResult<()> {
        if let Some(mut consumer) = self.consumer.take() {
            consumer.close().await?;
            debug!("Source '{}' closed", self.name);
        }
        Ok(())
    }
}
