//! Consumed-offset checkpoints, namespaced by `<zk_root>/<task_name>`.
//!
//! Offsets stored here are the *next* offset to read for each partition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::defaults::DEFAULT_OFFSET_STATE_DIR;
use crate::config::{PipelineConfig, keys};
use crate::errors::{TopologyError, TopologyResult};
use crate::record::SourcePosition;

/// Next offset to read, per partition.
pub type PartitionOffsets = BTreeMap<i32, i64>;

#[async_trait]
pub trait OffsetStore: Send + Sync + Debug {
    async fn load(&self, namespace: &str) -> TopologyResult<PartitionOffsets>;
    async fn store(&self, namespace: &str, offsets: &PartitionOffsets) -> TopologyResult<()>;
}

/// Advance `offsets` past every acknowledged position. Offsets never move back.
pub fn advance(offsets: &mut PartitionOffsets, positions: &[SourcePosition]) -> bool {
    let mut changed = false;
    for position in positions {
        let next = position.offset + 1;
        let entry = offsets.entry(position.partition).or_insert(0);
        if next > *entry {
            *entry = next;
            changed = true;
        }
    }
    changed
}

/// File-backed store under `offset_state_dir`, or under
/// [`DEFAULT_OFFSET_STATE_DIR`] when the key is absent.
pub fn offset_store_from_config(config: &PipelineConfig) -> Arc<dyn OffsetStore> {
    let dir = config
        .optional(keys::OFFSET_STATE_DIR)
        .unwrap_or(DEFAULT_OFFSET_STATE_DIR);
    Arc::new(FileOffsetStore::new(dir))
}

#[derive(Debug, Default)]
pub struct MemoryOffsetStore {
    namespaces: RwLock<HashMap<String, PartitionOffsets>>,
}

#[async_trait]
impl OffsetStore for MemoryOffsetStore {
    async fn load(&self, namespace: &str) -> TopologyResult<PartitionOffsets> {
        Ok(self
            .namespaces
            .read()
            .await
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }

    async fn store(&self, namespace: &str, offsets: &PartitionOffsets) -> TopologyResult<()> {
        self.namespaces
            .write()
            .await
            .insert(namespace.to_string(), offsets.clone());
        Ok(())
    }
}

/// One JSON document per namespace under a state directory.
#[derive(Debug, Clone)]
pub struct FileOffsetStore {
    dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct OffsetCheckpoint {
    namespace: String,
    offsets: PartitionOffsets,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl FileOffsetStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Checkpoint file for `namespace`. The name is the percent-encoded
    /// namespace, so distinct namespaces never share a file.
    pub fn checkpoint_path(&self, namespace: &str) -> PathBuf {
        let file_stem: String = url::form_urlencoded::byte_serialize(namespace.as_bytes()).collect();
        self.dir.join(format!("{file_stem}.json"))
    }
}

#[async_trait]
impl OffsetStore for FileOffsetStore {
    async fn load(&self, namespace: &str) -> TopologyResult<PartitionOffsets> {
        let path = self.checkpoint_path(namespace);
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(PartitionOffsets::new()),
            Err(e) => return Err(e.into()),
        };

        let checkpoint: OffsetCheckpoint = serde_json::from_slice(&contents).map_err(|e| {
            TopologyError::broker(format!("corrupt offset checkpoint {}: {e}", path.display()))
        })?;
        if checkpoint.namespace != namespace {
            return Err(TopologyError::broker(format!(
                "offset checkpoint {} belongs to '{}', not '{namespace}'",
                path.display(),
                checkpoint.namespace
            )));
        }
        Ok(checkpoint.offsets)
    }

    async fn store(&self, namespace: &str, offsets: &PartitionOffsets) -> TopologyResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let checkpoint = OffsetCheckpoint {
            namespace: namespace.to_string(),
            offsets: offsets.clone(),
            updated_at: chrono::Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&checkpoint)
            .map_err(|e| TopologyError::broker(format!("cannot encode offsets: {e}")))?;

        let path = self.checkpoint_path(namespace);
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, json).await?;
        tokio::fs::rename(&staging, &path).await?;

        debug!("Stored offsets for {} in {}", namespace, path.display());
        Ok(())
    }
}
