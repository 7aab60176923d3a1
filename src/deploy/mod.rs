//! Deployment dispatch: one built pipeline, two execution targets.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{PipelineConfig, TopologySettings};
use crate::errors::{TopologyError, TopologyResult};
use crate::operators::OperatorFactories;
use crate::topology::{PipelineBlueprint, Topology, TopologyBuilder, TopologyDescriptor};

pub mod cluster;
pub mod local;

pub use cluster::{Coordinator, HttpCoordinator, SubmissionReceipt};
pub use local::{LocalCluster, LocalRunSummary};

/// Where a pipeline is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployMode {
    /// In-process engine; blocks until the run ends
    Local,
    /// Remote coordinator; returns once the topology is accepted
    Cluster,
}

impl FromStr for DeployMode {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "cluster" => Ok(Self::Cluster),
            _ => Err(TopologyError::UnknownDeployMode {
                mode: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for DeployMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Cluster => f.write_str("cluster"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    LocalCompleted(LocalRunSummary),
    ClusterAccepted(SubmissionReceipt),
}

/// A validated configuration plus the topology its blueprint defined.
#[derive(Debug)]
pub struct Pipeline {
    settings: TopologySettings,
    topology: Topology,
    coordinator: Option<Arc<dyn Coordinator>>,
}

impl Pipeline {
    /// Validate `config`, then let `blueprint` define the operators, once.
    pub fn new<B>(
        config: PipelineConfig,
        blueprint: &B,
        factories: &OperatorFactories,
    ) -> TopologyResult<Self>
    where
        B: PipelineBlueprint + ?Sized,
    {
        config.validate_required()?;
        let settings = TopologySettings::from_config(&config)?;

        let mut builder = TopologyBuilder::new();
        blueprint.define_operators(&config, factories, &mut builder)?;
        let topology = builder.build(settings.clone())?;

        info!(
            workers = settings.coordinates.workers,
            "Pipeline '{}' defined with {} operators",
            settings.name,
            topology.node_count()
        );
        Ok(Self {
            settings,
            topology,
            coordinator: None,
        })
    }

    /// Submit cluster deployments through `coordinator` instead of HTTP.
    pub fn with_coordinator(mut self, coordinator: Arc<dyn Coordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &TopologySettings {
        &self.settings
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn descriptor(&self) -> TopologyDescriptor {
        self.topology.descriptor()
    }

    /// Submit, stopping a local run on Ctrl-C.
    pub async fn submit(self, mode: DeployMode) -> TopologyResult<SubmissionOutcome> {
        let shutdown = CancellationToken::new();
        let listener = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received, stopping");
                    shutdown.cancel();
                }
            }
        });

        let outcome = self.submit_until(mode, shutdown).await;
        listener.abort();
        outcome
    }

    /// Submit; a local run stops when `shutdown` is cancelled.
    pub async fn submit_until(
        self,
        mode: DeployMode,
        shutdown: CancellationToken,
    ) -> TopologyResult<SubmissionOutcome> {
        info!("Submitting pipeline '{}' in {} mode", self.settings.name, mode);

        match mode {
            DeployMode::Local => LocalCluster::new()
                .run(self.topology, shutdown)
                .await
                .map(SubmissionOutcome::LocalCompleted),
            DeployMode::Cluster => {
                let coordinator = match self.coordinator {
                    Some(coordinator) => coordinator,
                    None => Arc::new(HttpCoordinator::new(
                        &self.settings.coordinates,
                        self.settings.submit_timeout,
                    )?),
                };

                let descriptor = self.topology.descriptor();
                match coordinator.submit(&descriptor).await {
                    Ok(receipt) => Ok(SubmissionOutcome::ClusterAccepted(receipt)),
                    Err(e) => {
                        error!("Cluster submission of '{}' failed: {}", descriptor.name, e);
                        Err(e.into())
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("local", DeployMode::Local)]
    #[case("LOCAL", DeployMode::Local)]
    #[case(" Cluster ", DeployMode::Cluster)]
    fn test_mode_parsing(#[case] raw: &str, #[case] expected: DeployMode) {
        assert_eq!(raw.parse::<DeployMode>().unwrap(), expected);
    }

    #[rstest]
    #[case("unknown-mode")]
    #[case("")]
    #[case("remote")]
    fn test_unknown_modes_are_explicit_errors(#[case] raw: &str) {
        let err = raw.parse::<DeployMode>().unwrap_err();
        assert!(matches!(err, TopologyError::UnknownDeployMode { ref mode } if mode == raw));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_mode_display_round_trips() {
        for mode in [DeployMode::Local, DeployMode::Cluster] {
            assert_eq!(mode.to_string().parse::<DeployMode>().unwrap(), mode);
        }
    }
}
