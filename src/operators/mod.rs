//! Operator contracts and the two built-in operator factories.

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

use crate::config::{PipelineConfig, TopologySettings};
use crate::errors::TopologyResult;
use crate::record::{Record, SourcePosition};

pub mod sink;
pub mod source;

pub use sink::{FileSink, SinkSpec};
pub use source::{BrokerConnector, MessageSource, SourceSpec};

/// Runtime identity handed to operators when they open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorContext {
    pub topology: String,
    pub task_index: u32,
}

impl OperatorContext {
    pub fn new<S: Into<String>>(topology: S, task_index: u32) -> Self {
        Self {
            topology: topology.into(),
            task_index,
        }
    }
}

/// What a single sink write triggered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Every record written so far is now durable
    pub synced: bool,
    /// The active file was closed and a new one opened
    pub rotated: bool,
}

#[async_trait]
pub trait SourceOperator: Send + Debug {
    fn name(&self) -> &str;

    /// Descriptor fields; must depend only on configuration.
    fn spec(&self) -> serde_json::Value;

    async fn open(&mut self, context: &OperatorContext) -> TopologyResult<()>;

    /// Next batch of records. `Ok(None)` ends the stream; an empty batch
    /// only means nothing arrived within the poll timeout.
    async fn next_batch(&mut self) -> TopologyResult<Option<Vec<Record>>>;

    /// Acknowledge positions whose records are durably persisted.
    async fn commit(&mut self, positions: &[SourcePosition]) -> TopologyResult<()>;

    async fn close(&mut self) -> TopologyResult<()>;
}

#[async_trait]
pub trait SinkOperator: Send + Debug {
    fn name(&self) -> &str;

    fn spec(&self) -> serde_json::Value;

    async fn open(&mut self, context: &OperatorContext) -> TopologyResult<()>;

    async fn write(&mut self, record: &Record) -> TopologyResult<WriteOutcome>;

    /// Records written but not yet synced.
    fn unsynced_records(&self) -> u64;

    /// Sync and release. Everything written before is durable afterwards.
    async fn close(&mut self) -> TopologyResult<()>;
}

/// A per-record transformation between source and sink.
pub trait ProcessingStage: Send + Debug {
    fn name(&self) -> &str;

    fn spec(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    fn prepare(&mut self, _settings: &TopologySettings) -> TopologyResult<()> {
        Ok(())
    }

    /// Zero or more output records; outputs should keep the input's position.
    fn process(&mut self, record: Record) -> TopologyResult<Vec<Record>>;
}

/// Builds the source and sink operators from configuration.
#[derive(Debug, Clone)]
pub struct OperatorFactories {
    connector: Arc<dyn BrokerConnector>,
}

impl OperatorFactories {
    pub fn new(connector: Arc<dyn BrokerConnector>) -> Self {
        Self { connector }
    }

    pub fn connector(&self) -> &Arc<dyn BrokerConnector> {
        &self.connector
    }

    /// Never contacts the broker.
    pub fn build_source(&self, config: &PipelineConfig) -> TopologyResult<MessageSource> {
        MessageSource::from_config(config, Arc::clone(&self.connector))
    }

    /// Never contacts the filesystem; reachability is checked on open.
    pub fn build_sink(&self, config: &PipelineConfig) -> TopologyResult<FileSink> {
        FileSink::from_config(config)
    }
}
