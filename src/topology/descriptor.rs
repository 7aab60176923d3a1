//! Serializable description of a topology: what is sent to the cluster
//! coordinator, and what two pipelines are compared by.

use serde::{Deserialize, Serialize};

use crate::config::TopologySettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Source,
    Stage,
    Sink,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub name: String,
    pub kind: NodeKind,
    pub spec: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDescriptor {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopologyDescriptor {
    pub name: String,
    pub workers: u32,
    pub settings: TopologySettings,
    pub nodes: Vec<NodeDescriptor>,
    pub edges: Vec<EdgeDescriptor>,
}

impl TopologyDescriptor {
    /// Nodes of the given kind, in chain order.
    pub fn nodes_of(&self, kind: NodeKind) -> impl Iterator<Item = &NodeDescriptor> {
        self.nodes.iter().filter(move |node| node.kind == kind)
    }

    /// Same operators, specs and wiring, ignoring the topology name and
    /// the consumer identity it implies.
    pub fn same_shape(&self, other: &Self) -> bool {
        fn strip(descriptor: &TopologyDescriptor) -> Vec<(String, NodeKind, serde_json::Value)> {
            descriptor
                .nodes
                .iter()
                .map(|node| {
                    let mut spec = node.spec.clone();
                    if let Some(fields) = spec.as_object_mut() {
                        fields.remove("consumer_id");
                        fields.remove("offset_namespace");
                    }
                    (node.name.clone(), node.kind, spec)
                })
                .collect()
        }

        self.workers == other.workers && self.edges == other.edges && strip(self) == strip(other)
    }
}
