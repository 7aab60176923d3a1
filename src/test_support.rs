use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::PipelineConfig;
use crate::errors::{TopologyError, TopologyResult};
use crate::storage::{FileSystem, OutputFile};

/// The reference ingestion properties used across unit tests.
pub(crate) fn reference_config() -> PipelineConfig {
    PipelineConfig::from_map([
        ("task_name", "ingest1"),
        ("nimbus_seeds", "10.0.0.1:6627,10.0.0.2:6627"),
        ("work_num", "4"),
        ("zk_hosts_port", "zk1:2181,zk2:2181"),
        ("kafka_topic", "events"),
        ("zk_root", "/storm"),
        ("hdfs_url", "hdfs://nn:8020"),
        ("hdfs_work_dir", "/data/events"),
        ("delimiter", ","),
    ])
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryFile {
    pub data: Vec<u8>,
    pub synced_len: usize,
    pub syncs: u32,
    pub closed: bool,
}

/// Filesystem double that records every write and sync.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryFileSystem {
    files: Arc<Mutex<BTreeMap<String, MemoryFile>>>,
    unavailable: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryFileSystem {
    pub fn files(&self) -> BTreeMap<String, MemoryFile> {
        self.files.lock().unwrap().clone()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Concatenated contents of all files in name order.
    pub fn contents(&self) -> String {
        self.files()
            .values()
            .map(|f| String::from_utf8_lossy(&f.data).into_owned())
            .collect()
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    fn url(&self) -> &str {
        "memory://"
    }

    async fn check_writable(&self, dir: &str) -> TopologyResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TopologyError::storage_unavailable(
                "memory://",
                format!("{dir} is not writable"),
            ));
        }
        Ok(())
    }

    async fn create(&self, path: &str) -> TopologyResult<Box<dyn OutputFile>> {
        let mut files = self.files.lock().unwrap();
        if files.contains_key(path) {
            return Err(TopologyError::storage_unavailable("memory://", format!("{path} exists")));
        }
        files.insert(path.to_string(), MemoryFile::default());
        Ok(Box::new(MemoryOutputFile {
            fs: self.clone(),
            path: path.to_string(),
        }))
    }
}

#[derive(Debug)]
struct MemoryOutputFile {
    fs: MemoryFileSystem,
    path: String,
}

impl MemoryOutputFile {
    fn update<F: FnOnce(&mut MemoryFile)>(&self, f: F) -> TopologyResult<()> {
        if self.fs.fail_writes.load(Ordering::SeqCst) {
            return Err(TopologyError::storage_unavailable("memory://", "write failed"));
        }
        let mut files = self.fs.files.lock().unwrap();
        let file = files.get_mut(&self.path).unwrap();
        if file.closed {
            return Err(TopologyError::illegal_state("closed"));
        }
        f(file);
        Ok(())
    }
}

#[async_trait]
impl OutputFile for MemoryOutputFile {
    fn path(&self) -> &str {
        &self.path
    }

    async fn write(&mut self, bytes: &[u8]) -> TopologyResult<()> {
        self.update(|file| file.data.extend_from_slice(bytes))
    }

    async fn sync(&mut self) -> TopologyResult<()> {
        self.update(|file| {
            file.synced_len = file.data.len();
            file.syncs += 1;
        })
    }

    async fn close(&mut self) -> TopologyResult<()> {
        self.update(|file| {
            file.synced_len = file.data.len();
            file.closed = true;
        })
    }
}
