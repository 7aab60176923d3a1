//! Topology assembly: the [`PipelineBlueprint`] extension point, the
//! linear [`TopologyBuilder`] and the built [`Topology`].

use crate::config::{PipelineConfig, TopologySettings};
use crate::errors::TopologyResult;
use crate::operators::{OperatorFactories, ProcessingStage, SinkOperator, SourceOperator};

pub mod builder;
pub mod descriptor;

pub use builder::TopologyBuilder;
pub use descriptor::{EdgeDescriptor, NodeDescriptor, NodeKind, TopologyDescriptor};

/// A concrete pipeline: decides which operators make up the chain.
///
/// Invoked exactly once per pipeline, synchronously, while the pipeline is
/// constructed.
pub trait PipelineBlueprint: Send + Sync {
    fn define_operators(
        &self,
        config: &PipelineConfig,
        factories: &OperatorFactories,
        builder: &mut TopologyBuilder,
    ) -> TopologyResult<()>;
}

impl<F> PipelineBlueprint for F
where
    F: Fn(&PipelineConfig, &OperatorFactories, &mut TopologyBuilder) -> TopologyResult<()>
        + Send
        + Sync,
{
    fn define_operators(
        &self,
        config: &PipelineConfig,
        factories: &OperatorFactories,
        builder: &mut TopologyBuilder,
    ) -> TopologyResult<()> {
        self(config, factories, builder)
    }
}

/// A built source → stages → sink chain with its engine settings.
#[derive(Debug)]
pub struct Topology {
    pub(crate) settings: TopologySettings,
    pub(crate) source: Box<dyn SourceOperator>,
    pub(crate) stages: Vec<Box<dyn ProcessingStage>>,
    pub(crate) sink: Box<dyn SinkOperator>,
}

impl Topology {
    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &TopologySettings {
        &self.settings
    }

    pub fn node_count(&self) -> usize {
        self.stages.len() + 2
    }

    pub fn descriptor(&self) -> TopologyDescriptor {
        let mut nodes = Vec::with_capacity(self.node_count());
        nodes.push(NodeDescriptor {
            name: self.source.name().to_string(),
            kind: NodeKind::Source,
            spec: self.source.spec(),
        });
        nodes.extend(self.stages.iter().map(|stage| NodeDescriptor {
            name: stage.name().to_string(),
            kind: NodeKind::Stage,
            spec: stage.spec(),
        }));
        nodes.push(NodeDescriptor {
            name: self.sink.name().to_string(),
            kind: NodeKind::Sink,
            spec: self.sink.spec(),
        });

        let edges = nodes
            .windows(2)
            .map(|pair| EdgeDescriptor {
                from: pair[0].name.clone(),
                to: pair[1].name.clone(),
            })
            .collect();

        TopologyDescriptor {
            name: self.settings.name.clone(),
            workers: self.settings.coordinates.workers,
            settings: self.settings.clone(),
            nodes,
            edges,
        }
    }
}
