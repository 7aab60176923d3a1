//! Error type definitions for stream-topology
//!
//! A small hierarchy: [`TopologyError`] is what every public API returns,
//! [`DeploymentError`] carries the detail of a failed cluster submission.

use std::time::Duration;

use thiserror::Error;

/// Top-level error type
#[derive(Error, Debug)]
pub enum TopologyError {
    /// Missing or malformed property. Fatal; the process should not proceed.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The sink cannot reach its filesystem or write to its destination
    #[error("Storage unavailable: {url} - {message}")]
    StorageUnavailable { url: String, message: String },

    /// Cluster submission failed
    #[error("Deployment error: {0}")]
    Deployment(#[from] DeploymentError),

    /// An API was used out of order, e.g. building a topology with no sink
    #[error("Illegal state: {message}")]
    IllegalState { message: String },

    /// A deployment mode string that is neither `local` nor `cluster`
    #[error("Unknown deployment mode '{mode}': expected 'local' or 'cluster'")]
    UnknownDeployMode { mode: String },

    /// Message broker failures raised while the source is running
    #[error("Broker error: {message}")]
    Broker { message: String },

    /// Local I/O failures outside of the sink (config files, offset state)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cluster submission specific errors
#[derive(Error, Debug)]
pub enum DeploymentError {
    /// No seed accepted a connection
    #[error("Coordinator unreachable via seeds [{}]: {message}", .seeds.join(", "))]
    Unreachable { seeds: Vec<String>, message: String },

    /// Submission did not complete within the configured bound
    #[error("Submission timed out after {after:?}")]
    Timeout { after: Duration },

    /// A topology with the same name is already running
    #[error("Topology name collision: '{name}' is already deployed")]
    NameCollision { name: String },

    /// The coordinator could not accept the submitted graph
    #[error("Malformed topology: {message}")]
    MalformedTopology { message: String },

    /// Any other refusal reported by the coordinator
    #[error("Submission rejected by {seed} (HTTP {status}): {message}")]
    Rejected {
        seed: String,
        status: u16,
        message: String,
    },
}

/// Convenience methods for creating common error types
impl TopologyError {
    /// Create a configuration error with a custom message
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a storage unavailable error
    pub fn storage_unavailable<U: Into<String>, M: Into<String>>(url: U, message: M) -> Self {
        Self::StorageUnavailable {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create an illegal state error
    pub fn illegal_state<S: Into<String>>(message: S) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Create a broker error
    pub fn broker<S: Into<String>>(message: S) -> Self {
        Self::Broker {
            message: message.into(),
        }
    }

    /// Error for a required key that is absent or blank
    pub fn missing_key(key: &str) -> Self {
        Self::configuration(format!("required property '{key}' is missing or blank"))
    }

    /// Error for a key whose value cannot be interpreted
    pub fn invalid_value<M: std::fmt::Display>(key: &str, value: &str, reason: M) -> Self {
        Self::configuration(format!("invalid value '{value}' for '{key}': {reason}"))
    }

    /// True for errors detected while constructing the pipeline
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::UnknownDeployMode { .. }
        )
    }

    /// True for failures the engine restart policy should retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable { .. } | Self::Broker { .. } | Self::Io(_)
        )
    }
}
