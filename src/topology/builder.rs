use tracing::warn;

use super::Topology;
use crate::config::TopologySettings;
use crate::errors::{TopologyError, TopologyResult};
use crate::operators::{ProcessingStage, SinkOperator, SourceOperator};

/// Collects the operators of a linear chain: one source, any number of
/// stages in order, one sink.
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    source: Option<Box<dyn SourceOperator>>,
    stages: Vec<Box<dyn ProcessingStage>>,
    sink: Option<Box<dyn SinkOperator>>,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the chain's source, replacing any earlier one.
    pub fn set_source<S: SourceOperator + 'static>(&mut self, source: S) -> &mut Self {
        if let Some(previous) = self.source.replace(Box::new(source)) {
            warn!("Source '{}' replaced before build", previous.name());
        }
        self
    }

    /// Append a stage after the ones already added.
    pub fn add_stage<P: ProcessingStage + 'static>(&mut self, stage: P) -> &mut Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Set the chain's sink, replacing any earlier one.
    pub fn set_sink<S: SinkOperator + 'static>(&mut self, sink: S) -> &mut Self {
        if let Some(previous) = self.sink.replace(Box::new(sink)) {
            warn!("Sink '{}' replaced before build", previous.name());
        }
        self
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn build(self, settings: TopologySettings) -> TopologyResult<Topology> {
        let source = self.source.ok_or_else(|| {
            TopologyError::illegal_state(format!("topology '{}' has no source", settings.name))
        })?;
        let sink = self.sink.ok_or_else(|| {
            TopologyError::illegal_state(format!("topology '{}' has no sink", settings.name))
        })?;

        let mut names: Vec<&str> = std::iter::once(source.name())
            .chain(self.stages.iter().map(|stage| stage.name()))
            .chain(std::iter::once(sink.name()))
            .collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(TopologyError::illegal_state(format!(
                "operator name '{}' is used twice",
                pair[0]
            )));
        }

        Ok(Topology {
            settings,
            source,
            stages: self.stages,
            sink,
        })
    }
}
