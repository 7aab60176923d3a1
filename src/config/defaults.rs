/// Configuration default values
///
/// This module contains all the default values for optional properties,
/// making them easily changeable in one central location.
// Sink defaults
pub const DEFAULT_ROTATION_SIZE: &str = "1024MB";
pub const DEFAULT_SYNC_COUNT: u64 = 4096;
pub const DEFAULT_FILE_EXTENSION: &str = ".txt";
pub const DEFAULT_SINK_COMPONENT: &str = "sink";

// Source defaults
pub const DEFAULT_POLL_BATCH_SIZE: usize = 500;
pub const DEFAULT_POLL_TIMEOUT: &str = "1s";
pub const DEFAULT_OFFSET_STATE_DIR: &str = "./data/offsets";

// Deployment defaults
pub const DEFAULT_SUBMIT_TIMEOUT: &str = "30s";
pub const DEFAULT_RESTART_ATTEMPTS: u32 = 3;
pub const DEFAULT_RESTART_BACKOFF: &str = "1s";
pub const COORDINATOR_SUBMIT_PATH: &str = "/api/v1/topologies";
pub const SUBMISSION_ID_HEADER: &str = "x-submission-id";

// Loader defaults
pub const ENV_OVERRIDE_PREFIX: &str = "STREAM_TOPOLOGY_";
