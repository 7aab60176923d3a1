//! Property names recognized in a topology properties file.
//!
//! Anything not listed here is ignored by the loader.

pub const TASK_NAME: &str = "task_name";
pub const NIMBUS_SEEDS: &str = "nimbus_seeds";
pub const WORK_NUM: &str = "work_num";

// Broker locator; also forwarded to HBase clients as their ZooKeeper quorum
pub const ZK_HOSTS_PORT: &str = "zk_hosts_port";
pub const ZK_PORT: &str = "zk_port";
pub const HMASTER: &str = "hmaster";

pub const KAFKA_TOPIC: &str = "kafka_topic";
pub const ZK_ROOT: &str = "zk_root";
pub const POLL_BATCH_SIZE: &str = "poll_batch_size";
pub const POLL_TIMEOUT: &str = "poll_timeout";
pub const OFFSET_STATE_DIR: &str = "offset_state_dir";

pub const HDFS_URL: &str = "hdfs_url";
pub const HDFS_WORK_DIR: &str = "hdfs_work_dir";
pub const HDFS_USER: &str = "hdfs_user";
pub const DELIMITER: &str = "delimiter";
pub const ROTATION_SIZE: &str = "rotation_size";
pub const SYNC_COUNT: &str = "sync_count";
pub const FILE_PREFIX: &str = "file_prefix";
pub const FILE_EXTENSION: &str = "file_extension";

pub const SUBMIT_TIMEOUT: &str = "submit_timeout";
pub const RESTART_ATTEMPTS: &str = "restart_attempts";
pub const RESTART_BACKOFF: &str = "restart_backoff";

pub const INPUT_FIELD_SEPARATOR: &str = "input_field_separator";

/// Keys that must be present and non-blank for a pipeline to be constructed.
pub const REQUIRED: &[&str] = &[
    TASK_NAME,
    NIMBUS_SEEDS,
    WORK_NUM,
    ZK_HOSTS_PORT,
    KAFKA_TOPIC,
    ZK_ROOT,
    HDFS_URL,
    HDFS_WORK_DIR,
    DELIMITER,
];
