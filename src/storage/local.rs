//! `file://` storage rooted at a local directory.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

use super::{FileSystem, OutputFile};
use crate::errors::{TopologyError, TopologyResult};

/// Local filesystem storage.
///
/// Sink paths such as `/data/events` are resolved inside `root`; a path that
/// would escape the root is refused.
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    url: String,
    root: PathBuf,
}

impl LocalFileSystem {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        let root = root.into();
        Self {
            url: format!("file://{}", root.display()),
            root,
        }
    }

    pub fn from_url(url: &Url) -> TopologyResult<Self> {
        let root = url.to_file_path().map_err(|_| {
            TopologyError::invalid_value(
                crate::config::keys::HDFS_URL,
                url.as_str(),
                "not an absolute local path",
            )
        })?;
        Ok(Self {
            url: url.as_str().to_string(),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a sink path onto the local root.
    pub fn resolve(&self, path: &str) -> TopologyResult<PathBuf> {
        if path.contains('\0') {
            return Err(self.unavailable(format!("path '{path}' contains null bytes")));
        }

        let mut resolved = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(self.unavailable(format!("path '{path}' escapes the storage root")));
                }
            }
        }
        Ok(resolved)
    }

    fn unavailable(&self, message: String) -> TopologyError {
        TopologyError::storage_unavailable(&self.url, message)
    }

    /// Symlinks inside the root may still point elsewhere.
    fn ensure_within_root(&self, dir: &Path) -> TopologyResult<()> {
        let canonical_root = self
            .root
            .canonicalize()
            .map_err(|e| self.unavailable(format!("cannot resolve root: {e}")))?;
        let canonical_dir = dir
            .canonicalize()
            .map_err(|e| self.unavailable(format!("cannot resolve {}: {e}", dir.display())))?;

        if !canonical_dir.starts_with(&canonical_root) {
            return Err(self.unavailable(format!(
                "{} resolves outside '{}'",
                canonical_dir.display(),
                canonical_root.display()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    fn url(&self) -> &str {
        &self.url
    }

    async fn check_writable(&self, dir: &str) -> TopologyResult<()> {
        let local_dir = self.resolve(dir)?;
        tokio::fs::create_dir_all(&local_dir)
            .await
            .map_err(|e| self.unavailable(format!("cannot create {}: {e}", local_dir.display())))?;
        self.ensure_within_root(&local_dir)?;

        let probe = local_dir.join(format!(".probe-{}", uuid::Uuid::new_v4()));
        File::create(&probe)
            .await
            .map_err(|e| self.unavailable(format!("{} is not writable: {e}", local_dir.display())))?;
        tokio::fs::remove_file(&probe).await?;

        debug!("Local storage directory {} is writable", local_dir.display());
        Ok(())
    }

    async fn create(&self, path: &str) -> TopologyResult<Box<dyn OutputFile>> {
        let local_path = self.resolve(path)?;
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&local_path)
            .await
            .map_err(|e| self.unavailable(format!("cannot create {}: {e}", local_path.display())))?;

        Ok(Box::new(LocalOutputFile {
            path: path.to_string(),
            file: Some(file),
        }))
    }
}

#[derive(Debug)]
struct LocalOutputFile {
    path: String,
    file: Option<File>,
}

impl LocalOutputFile {
    fn handle(&mut self) -> TopologyResult<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| TopologyError::illegal_state(format!("{} is already closed", self.path)))
    }
}

#[async_trait]
impl OutputFile for LocalOutputFile {
    fn path(&self) -> &str {
        &self.path
    }

    async fn write(&mut self, bytes: &[u8]) -> TopologyResult<()> {
        self.handle()?.write_all(bytes).await?;
        Ok(())
    }

    async fn sync(&mut self) -> TopologyResult<()> {
        let file = self.handle()?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn close(&mut self) -> TopologyResult<()> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| TopologyError::illegal_state(format!("{} is already closed", self.path)))?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_stays_inside_root() {
        let fs = LocalFileSystem::new("/srv/ingest");
        assert_eq!(
            fs.resolve("/data/events/a.txt").unwrap(),
            PathBuf::from("/srv/ingest/data/events/a.txt")
        );
        assert_eq!(
            fs.resolve("./data").unwrap(),
            PathBuf::from("/srv/ingest/data")
        );
        assert!(fs.resolve("/data/../../etc").is_err());
        assert!(fs.resolve("/data\0").is_err());
    }

    #[tokio::test]
    async fn test_write_sync_close() {
        let temp_dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new(temp_dir.path());

        fs.check_writable("/data/events").await.unwrap();
        let mut file = fs.create("/data/events/part-0.txt").await.unwrap();
        file.write(b"a,b\n").await.unwrap();
        file.sync().await.unwrap();
        file.write(b"c,d\n").await.unwrap();
        file.close().await.unwrap();

        let contents =
            std::fs::read_to_string(temp_dir.path().join("data/events/part-0.txt")).unwrap();
        assert_eq!(contents, "a,b\nc,d\n");
        assert!(file.write(b"late\n").await.is_err());
    }

    #[tokio::test]
    async fn test_create_is_exclusive() {
        let temp_dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new(temp_dir.path());
        fs.check_writable("/out").await.unwrap();

        let _first = fs.create("/out/a.txt").await.unwrap();
        let err = fs.create("/out/a.txt").await.unwrap_err();
        assert!(matches!(err, TopologyError::StorageUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_unusable_root_is_storage_unavailable() {
        let temp_dir = tempfile::tempdir().unwrap();
        let blocker = temp_dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();

        let fs = LocalFileSystem::new(&blocker);
        let err = fs.check_writable("/data").await.unwrap_err();
        assert!(matches!(err, TopologyError::StorageUnavailable { .. }));
        assert!(err.is_retryable());
    }
}
