//! Centralized error handling for stream-topology
//!
//! Every fallible operation in the crate returns [`TopologyError`], so callers
//! can tell the three failure families apart without string matching.
//!
//! # Error Categories
//!
//! - **Configuration Errors**: missing or malformed properties, detected while
//!   the pipeline is being constructed. Fatal, never retried.
//! - **Storage Errors**: the sink cannot reach its filesystem or write to its
//!   destination. Detected when the operator opens, retried by the engine.
//! - **Deployment Errors**: the cluster coordinator rejected the topology or
//!   could not be reached. Returned to the caller of `submit`.
//!
//! # Usage
//!
//! ```rust
//! use stream_topology::errors::{TopologyError, TopologyResult};
//!
//! fn require_topic(topic: &str) -> TopologyResult<&str> {
//!     if topic.trim().is_empty() {
//!         return Err(TopologyError::configuration("kafka_topic must not be blank"));
//!     }
//!     Ok(topic)
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using TopologyError
pub type TopologyResult<T> = Result<T, TopologyError>;

/// Convenience type alias for cluster submission Results
pub type DeploymentResult<T> = Result<T, DeploymentError>;
