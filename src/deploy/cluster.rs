//! Cluster submission over HTTP.
//!
//! The descriptor is posted to `http://<seed>/api/v1/topologies`, trying
//! seeds in order until one answers. The whole attempt is bounded by the
//! configured submission timeout.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::ClusterCoordinates;
use crate::config::defaults::{COORDINATOR_SUBMIT_PATH, SUBMISSION_ID_HEADER};
use crate::errors::{DeploymentError, DeploymentResult, TopologyError, TopologyResult};
use crate::topology::TopologyDescriptor;

/// The coordinator's acknowledgement of an accepted topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub topology_id: String,
    pub status: String,
    /// Seed that accepted the submission
    #[serde(default)]
    pub seed: String,
}

/// Accepts or rejects topologies; does not run them for the caller.
#[async_trait]
pub trait Coordinator: Send + Sync + Debug {
    async fn submit(&self, descriptor: &TopologyDescriptor) -> DeploymentResult<SubmissionReceipt>;
}

#[derive(Debug, Clone)]
pub struct HttpCoordinator {
    seeds: Vec<String>,
    timeout: Duration,
    client: Client,
}

impl HttpCoordinator {
    pub fn new(coordinates: &ClusterCoordinates, timeout: Duration) -> TopologyResult<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .user_agent(concat!("stream-topology/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TopologyError::configuration(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            seeds: coordinates.seeds.clone(),
            timeout,
            client,
        })
    }

    pub fn seeds(&self) -> &[String] {
        &self.seeds
    }

    fn submit_url(seed: &str) -> Result<Url, url::ParseError> {
        let base = if seed.contains("://") {
            Url::parse(seed)?
        } else {
            Url::parse(&format!("http://{seed}"))?
        };
        base.join(COORDINATOR_SUBMIT_PATH)
    }

    async fn try_seeds(&self, descriptor: &TopologyDescriptor) -> DeploymentResult<SubmissionReceipt> {
        let submission_id = Uuid::new_v4().to_string();
        let mut failures = Vec::new();
        let mut last_rejection = None;

        for seed in &self.seeds {
            let url = match Self::submit_url(seed) {
                Ok(url) => url,
                Err(e) => {
                    warn!("Skipping coordinator seed '{}': {}", seed, e);
                    failures.push(format!("{seed}: {e}"));
                    continue;
                }
            };

            debug!(%submission_id, "Submitting '{}' to {}", descriptor.name, url);
            let response = match self
                .client
                .post(url)
                .header(SUBMISSION_ID_HEADER, &submission_id)
                .json(descriptor)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!("Coordinator seed {} unreachable: {}", seed, e);
                    failures.push(format!("{seed}: {e}"));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let mut receipt: SubmissionReceipt =
                    response
                        .json()
                        .await
                        .map_err(|e| DeploymentError::Rejected {
                            seed: seed.clone(),
                            status: status.as_u16(),
                            message: format!("unreadable receipt: {e}"),
                        })?;
                receipt.seed = seed.clone();
                return Ok(receipt);
            }

            let body = response.text().await.unwrap_or_default();
            let message = body.trim().to_string();
            match status {
                StatusCode::CONFLICT => {
                    return Err(DeploymentError::NameCollision {
                        name: descriptor.name.clone(),
                    });
                }
                StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                    return Err(DeploymentError::MalformedTopology { message });
                }
                _ => {
                    warn!("Coordinator seed {} answered HTTP {}", seed, status);
                    failures.push(format!("{seed}: HTTP {status}"));
                    last_rejection = Some(DeploymentError::Rejected {
                        seed: seed.clone(),
                        status: status.as_u16(),
                        message,
                    });
                }
            }
        }

        Err(last_rejection.unwrap_or_else(|| DeploymentError::Unreachable {
            seeds: self.seeds.clone(),
            message: failures.join("; "),
        }))
    }
}

#[async_trait]
impl Coordinator for HttpCoordinator {
    async fn submit(&self, descriptor: &TopologyDescriptor) -> DeploymentResult<SubmissionReceipt> {
        let receipt = tokio::time::timeout(self.timeout, self.try_seeds(descriptor))
            .await
            .map_err(|_| DeploymentError::Timeout {
                after: self.timeout,
            })??;

        info!(
            topology_id = %receipt.topology_id,
            "Topology '{}' accepted by {} ({})",
            descriptor.name,
            receipt.seed,
            receipt.status
        );
        Ok(receipt)
    }
}
