//! Delimited-file persistence with size rotation and count-based sync.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::{OperatorContext, SinkOperator, WriteOutcome};
use crate::config::defaults::{
    DEFAULT_FILE_EXTENSION, DEFAULT_ROTATION_SIZE, DEFAULT_SINK_COMPONENT, DEFAULT_SYNC_COUNT,
};
use crate::config::{PipelineConfig, keys};
use crate::errors::{TopologyError, TopologyResult};
use crate::record::Record;
use crate::storage::{self, FileSystem, OutputFile};

pub mod format;
pub mod policy;

pub use format::{DefaultFileNameFormat, DelimitedRecordFormat};
pub use policy::{CountSyncPolicy, FileSizeRotationPolicy, SizeUnit};

/// Where and how the sink writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkSpec {
    pub url: String,
    pub work_dir: String,
    pub delimiter: char,
    pub rotation: FileSizeRotationPolicy,
    pub sync_count: u64,
    pub file_prefix: String,
    pub file_extension: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl SinkSpec {
    pub fn from_config(config: &PipelineConfig) -> TopologyResult<Self> {
        let delimiter = DelimitedRecordFormat::parse(config.require_raw(keys::DELIMITER)?)?;
        let rotation = config
            .optional(keys::ROTATION_SIZE)
            .unwrap_or(DEFAULT_ROTATION_SIZE)
            .parse::<FileSizeRotationPolicy>()
            .map_err(|e| TopologyError::configuration(format!("'{}': {e}", keys::ROTATION_SIZE)))?;
        let sync_count = config.parse_or(keys::SYNC_COUNT, DEFAULT_SYNC_COUNT)?;
        CountSyncPolicy::new(sync_count)?;

        Ok(Self {
            url: config.require(keys::HDFS_URL)?.to_string(),
            work_dir: config.require(keys::HDFS_WORK_DIR)?.to_string(),
            delimiter: delimiter.delimiter(),
            rotation,
            sync_count,
            file_prefix: config.optional(keys::FILE_PREFIX).unwrap_or_default().to_string(),
            file_extension: config
                .optional(keys::FILE_EXTENSION)
                .unwrap_or(DEFAULT_FILE_EXTENSION)
                .to_string(),
            user: config.optional(keys::HDFS_USER).map(str::to_string),
        })
    }
}

#[derive(Debug)]
struct ActiveFile {
    file: Box<dyn OutputFile>,
    bytes: u64,
}

/// Sink operator writing rotated, delimiter-joined text files.
///
/// Rotation and sync compose: a rotation first syncs anything pending, so
/// a closed file never holds unsynced records.
#[derive(Debug)]
pub struct FileSink {
    name: String,
    spec: SinkSpec,
    fs: Arc<dyn FileSystem>,
    format: DelimitedRecordFormat,
    naming: DefaultFileNameFormat,
    sync_policy: CountSyncPolicy,
    topology: String,
    task_index: u32,
    /// Files opened so far; the next file's rotation number
    rotation: u64,
    active: Option<ActiveFile>,
}

impl FileSink {
    pub fn new(spec: SinkSpec, fs: Arc<dyn FileSystem>) -> TopologyResult<Self> {
        Ok(Self {
            name: DEFAULT_SINK_COMPONENT.to_string(),
            format: DelimitedRecordFormat::new(spec.delimiter),
            naming: DefaultFileNameFormat {
                path: spec.work_dir.clone(),
                prefix: spec.file_prefix.clone(),
                extension: spec.file_extension.clone(),
            },
            sync_policy: CountSyncPolicy::new(spec.sync_count)?,
            topology: String::new(),
            task_index: 0,
            rotation: 0,
            active: None,
            fs,
            spec,
        })
    }

    /// Build from properties. Resolves the storage URL but does not contact it.
    pub fn from_config(config: &PipelineConfig) -> TopologyResult<Self> {
        let spec = SinkSpec::from_config(config)?;
        let fs = storage::resolve(&spec.url, spec.user.as_deref())?;
        Self::new(spec, fs)
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn sink_spec(&self) -> &SinkSpec {
        &self.spec
    }

    /// Path of the file currently being written, if open.
    pub fn active_path(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.file.path())
    }

    async fn open_file(&mut self) -> TopologyResult<()> {
        let name = self.naming.name(
            &self.topology,
            &self.name,
            self.task_index,
            self.rotation,
            chrono::Utc::now().timestamp_millis(),
        );
        let path = self.naming.full_path(&name);
        let file = self.fs.create(&path).await?;
        self.rotation += 1;
        debug!("Sink '{}' opened {}", self.name, path);
        self.active = Some(ActiveFile { file, bytes: 0 });
        Ok(())
    }

    fn active_mut(&mut self) -> TopologyResult<&mut ActiveFile> {
        self.active
            .as_mut()
            .ok_or_else(|| TopologyError::illegal_state("sink used before open"))
    }

    async fn sync_active(&mut self) -> TopologyResult<()> {
        self.active_mut()?.file.sync().await?;
        self.sync_policy.reset();
        Ok(())
    }

    async fn rotate(&mut self) -> TopologyResult<()> {
        if let Some(mut finished) = self.active.take() {
            finished.file.close().await?;
            info!(
                "Sink '{}' rotated {} at {} bytes",
                self.name,
                finished.file.path(),
                finished.bytes
            );
        }
        self.open_file().await
    }
}

#[async_trait]
impl SinkOperator for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn spec(&self) -> serde_json::Value {
        serde_json::json!({
            "operator": "file_sink",
            "url": self.spec.url,
            "work_dir": self.spec.work_dir,
            "delimiter": self.spec.delimiter.to_string(),
            "rotation_size": format!("{}{}", self.spec.rotation.size, self.spec.rotation.unit),
            "rotation_bytes": self.spec.rotation.threshold_bytes,
            "sync_count": self.spec.sync_count,
            "file_prefix": self.spec.file_prefix,
            "file_extension": self.spec.file_extension,
        })
    }

    async fn open(&mut self, context: &OperatorContext) -> TopologyResult<()> {
        self.fs.check_writable(&self.spec.work_dir).await?;
        self.topology = context.topology.clone();
        self.task_index = context.task_index;
        self.sync_policy.reset();
        self.open_file().await?;
        info!(
            topology = %context.topology,
            "Sink '{}' writing to {}{} (rotate at {} bytes, sync every {} records)",
            self.name,
            self.fs.url(),
            self.spec.work_dir,
            self.spec.rotation.threshold_bytes,
            self.spec.sync_count
        );
        Ok(())
    }

    async fn write(&mut self, record: &Record) -> TopologyResult<WriteOutcome> {
        let line = self.format.format(record);
        let active = self.active_mut()?;
        active.file.write(&line).await?;
        active.bytes += line.len() as u64;
        let file_size = active.bytes;

        let mut outcome = WriteOutcome::default();
        if self.sync_policy.mark() {
            self.sync_active().await?;
            outcome.synced = true;
        }
        if self.spec.rotation.mark(file_size) {
            if self.sync_policy.pending() > 0 {
                self.sync_active().await?;
                outcome.synced = true;
            }
            self.rotate().await?;
            outcome.rotated = true;
        }
        Ok(outcome)
    }

    fn unsynced_records(&self) -> u64 {
        self.sync_policy.pending()
    }

    async fn close(&mut self) -> TopologyResult<()> {
        if let Some(mut active) = self.active.take() {
            active.file.close().await?;
            self.sync_policy.reset();
            debug!("Sink '{}' closed {}", self.name, active.file.path());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryFileSystem, reference_config};

    fn sink(rotation: &str, sync_count: &str) -> (FileSink, MemoryFileSystem) {
        let config = reference_config().with_overrides([
            ("rotation_size", rotation),
            ("sync_count", sync_count),
        ]);
        let fs = MemoryFileSystem::default();
        let sink = FileSink::new(
            SinkSpec::from_config(&config).unwrap(),
            Arc::new(fs.clone()),
        )
        .unwrap();
        (sink, fs)
    }

    fn context() -> OperatorContext {
        OperatorContext::new("ingest1", 0)
    }

    #[test]
    fn test_reference_spec_defaults() {
        let spec = SinkSpec::from_config(&reference_config()).unwrap();
        assert_eq!(spec.url, "hdfs://nn:8020");
        assert_eq!(spec.work_dir, "/data/events");
        assert_eq!(spec.delimiter, ',');
        assert_eq!(spec.rotation.threshold_bytes, 1024 * 1024 * 1024);
        assert_eq!(spec.sync_count, 4096);
        assert_eq!(spec.file_extension, ".txt");
        assert_eq!(spec.file_prefix, "");
    }

    #[test]
    fn test_zero_sync_count_is_rejected() {
        let config = reference_config().with_overrides([("sync_count", "0")]);
        assert!(SinkSpec::from_config(&config).unwrap_err().is_configuration());
    }

    #[tokio::test]
    async fn test_rotation_bounds_file_size() {
        let (mut sink, fs) = sink("10B", "100");
        sink.open(&context()).await.unwrap();

        // Each record serializes to 5 bytes.
        for i in 0..5 {
            sink.write(&Record::new(["ab".to_string(), i.to_string()])).await.unwrap();
        }
        sink.close().await.unwrap();

        let files = fs.files();
        assert_eq!(files.len(), 3);
        for file in files.values() {
            assert!(file.data.len() <= 10 + 5);
            assert_eq!(file.synced_len, file.data.len());
            assert!(file.closed);
        }
        let contents: Vec<String> = files
            .values()
            .map(|f| String::from_utf8(f.data.clone()).unwrap())
            .collect();
        assert_eq!(contents.concat(), "ab,0\nab,1\nab,2\nab,3\nab,4\n");
    }

    #[tokio::test]
    async fn test_rotated_files_are_named_by_counter() {
        let (mut sink, fs) = sink("1B", "100");
        sink.open(&context()).await.unwrap();
        sink.write(&Record::text("x")).await.unwrap();
        sink.write(&Record::text("y")).await.unwrap();

        let names: Vec<String> = fs.files().into_keys().collect();
        assert_eq!(names.len(), 3);
        for (rotation, name) in names.iter().enumerate() {
            assert!(name.starts_with(&format!("/data/events/ingest1-sink-0-{rotation}-")));
            assert!(name.ends_with(".txt"));
        }
    }

    #[tokio::test]
    async fn test_topologies_can_share_a_work_dir() {
        let (mut first, fs) = sink("1GB", "100");
        let mut second = FileSink::new(first.sink_spec().clone(), Arc::new(fs.clone())).unwrap();

        first.open(&OperatorContext::new("ingest1", 0)).await.unwrap();
        second.open(&OperatorContext::new("ingest2", 0)).await.unwrap();

        assert_ne!(first.active_path(), second.active_path());
        assert!(second.active_path().unwrap().starts_with("/data/events/ingest2-sink-0-0-"));
        assert_eq!(fs.files().len(), 2);
    }

    #[tokio::test]
    async fn test_sync_bounds_unsynced_records() {
        let (mut sink, fs) = sink("1GB", "3");
        sink.open(&context()).await.unwrap();

        let mut synced_at = Vec::new();
        for i in 0..7 {
            let outcome = sink.write(&Record::text(format!("r{i}"))).await.unwrap();
            assert!(sink.unsynced_records() <= 2);
            if outcome.synced {
                synced_at.push(i);
            }
        }

        assert_eq!(synced_at, vec![2, 5]);
        assert_eq!(sink.unsynced_records(), 1);
        let file = fs.files().into_values().next().unwrap();
        assert_eq!(file.syncs, 2);
        assert_eq!(file.synced_len, "r0\n".len() * 6);
    }

    #[tokio::test]
    async fn test_rotation_syncs_pending_records_first() {
        let (mut sink, fs) = sink("8B", "100");
        sink.open(&context()).await.unwrap();

        let first = sink.write(&Record::text("abc")).await.unwrap();
        assert!(!first.synced && !first.rotated);
        let second = sink.write(&Record::text("def")).await.unwrap();
        assert!(second.synced && second.rotated);
        assert_eq!(sink.unsynced_records(), 0);

        let files = fs.files();
        let rotated = files.values().next().unwrap();
        assert_eq!(rotated.data, b"abc\ndef\n");
        assert_eq!(rotated.synced_len, 8);
    }

    #[tokio::test]
    async fn test_open_fails_when_storage_is_unwritable() {
        let (mut sink, fs) = sink("1GB", "10");
        fs.set_unavailable(true);

        let err = sink.open(&context()).await.unwrap_err();
        assert!(matches!(err, TopologyError::StorageUnavailable { .. }));
        assert!(sink.write(&Record::text("x")).await.is_err());
    }

    #[tokio::test]
    async fn test_from_config_defers_storage_checks() {
        let temp_dir = tempfile::tempdir().unwrap();
        let blocker = temp_dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        let config = reference_config()
            .with_overrides([("hdfs_url", format!("file://{}", blocker.display()))]);
        let mut sink = FileSink::from_config(&config).unwrap();
        assert!(matches!(
            sink.open(&context()).await.unwrap_err(),
            TopologyError::StorageUnavailable { .. }
        ));
    }
}
