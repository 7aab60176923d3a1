//! Typed views over [`PipelineConfig`] used by the deployment layer.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::defaults::*;
use super::duration_serde::as_humantime;
use super::{PipelineConfig, keys};
use crate::errors::{TopologyError, TopologyResult};

/// Where the cluster coordinator can be reached and how many workers to ask for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterCoordinates {
    /// Seed addresses in the order they are tried. Not deduplicated.
    pub seeds: Vec<String>,
    /// Parallel execution slots requested from the coordinator (at least 1)
    pub workers: u32,
}

impl ClusterCoordinates {
    pub fn parse(seeds: &str, workers: &str) -> TopologyResult<Self> {
        let seeds: Vec<String> = seeds
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        if seeds.is_empty() {
            return Err(TopologyError::configuration(format!(
                "'{}' must list at least one coordinator address",
                keys::NIMBUS_SEEDS
            )));
        }

        let workers = workers
            .trim()
            .parse::<u32>()
            .map_err(|e| TopologyError::invalid_value(keys::WORK_NUM, workers, e))?;
        if workers == 0 {
            return Err(TopologyError::invalid_value(
                keys::WORK_NUM,
                "0",
                "worker count must be at least 1",
            ));
        }

        Ok(Self { seeds, workers })
    }

    pub fn from_config(config: &PipelineConfig) -> TopologyResult<Self> {
        Self::parse(
            config.require(keys::NIMBUS_SEEDS)?,
            config.require(keys::WORK_NUM)?,
        )
    }
}

/// HBase client settings forwarded to the engine for downstream stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HBaseSettings {
    pub zk_hosts: Option<String>,
    pub zk_port: Option<String>,
    pub hmaster: Option<String>,
}

impl HBaseSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            zk_hosts: config.optional(keys::ZK_HOSTS_PORT).map(str::to_string),
            zk_port: config.optional(keys::ZK_PORT).map(str::to_string),
            hmaster: config.optional(keys::HMASTER).map(str::to_string),
        }
    }
}

/// How the local engine reacts to operator failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RestartPolicy {
    /// Consecutive restarts allowed before the run is abandoned
    pub max_attempts: u32,
    /// Delay before the first restart; doubled for each further attempt
    #[serde(serialize_with = "as_humantime")]
    pub backoff: Duration,
}

impl RestartPolicy {
    pub fn from_config(config: &PipelineConfig) -> TopologyResult<Self> {
        Ok(Self {
            max_attempts: config.parse_or(keys::RESTART_ATTEMPTS, DEFAULT_RESTART_ATTEMPTS)?,
            backoff: config.duration_or(keys::RESTART_BACKOFF, DEFAULT_RESTART_BACKOFF)?,
        })
    }

    /// Backoff for the given 1-based attempt, capped at 64x the base delay.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(6);
        self.backoff.saturating_mul(1 << exponent)
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RESTART_ATTEMPTS,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Engine-level settings shared by both deployment targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopologySettings {
    /// Topology name; also the consumer identity of the source
    pub name: String,
    pub coordinates: ClusterCoordinates,
    pub hbase: HBaseSettings,
    #[serde(serialize_with = "as_humantime")]
    pub submit_timeout: Duration,
    pub restart: RestartPolicy,
}

impl TopologySettings {
    pub fn from_config(config: &PipelineConfig) -> TopologyResult<Self> {
        let submit_timeout = config.duration_or(keys::SUBMIT_TIMEOUT, DEFAULT_SUBMIT_TIMEOUT)?;
        if submit_timeout.is_zero() {
            return Err(TopologyError::invalid_value(
                keys::SUBMIT_TIMEOUT,
                "0",
                "submission timeout must be positive",
            ));
        }

        Ok(Self {
            name: config.require(keys::TASK_NAME)?.to_string(),
            coordinates: ClusterCoordinates::from_config(config)?,
            hbase: HBaseSettings::from_config(config),
            submit_timeout,
            restart: RestartPolicy::from_config(config)?,
        })
    }
}
