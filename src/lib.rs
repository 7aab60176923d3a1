//! Bootstrap for a streaming ingestion topology: a message-queue source, a
//! rotating delimited-file sink, and dispatch to a local engine or a remote
//! cluster coordinator.

pub mod config;
pub mod deploy;
pub mod errors;
pub mod operators;
pub mod pipelines;
pub mod record;
pub mod storage;
pub mod topology;

pub use config::PipelineConfig;
pub use deploy::{DeployMode, Pipeline, SubmissionOutcome};
pub use errors::{DeploymentError, TopologyError, TopologyResult};
pub use topology::{PipelineBlueprint, TopologyBuilder};

#[cfg(test)]
pub(crate) mod test_support;
