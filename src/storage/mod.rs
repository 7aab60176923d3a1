//! Filesystems the sink can write rotated output files to.
//!
//! A storage URL selects the backend:
//!
//! - `file:///srv/ingest` writes under a local root directory
//! - `hdfs://nn:9870`, `webhdfs://nn:9870` talk to a WebHDFS gateway over http
//! - `swebhdfs://nn:9871` talks to a WebHDFS gateway over https
//!
//! Resolving a URL never touches the network; reachability is checked when
//! the sink opens.

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use url::Url;

use crate::errors::{TopologyError, TopologyResult};

pub mod local;
pub mod webhdfs;

pub use local::LocalFileSystem;
pub use webhdfs::WebHdfsFileSystem;

/// A filesystem able to host the sink's output directory.
#[async_trait]
pub trait FileSystem: Send + Sync + Debug {
    /// The URL this filesystem was resolved from
    fn url(&self) -> &str;

    /// Create `dir` if needed and confirm it accepts new files.
    async fn check_writable(&self, dir: &str) -> TopologyResult<()>;

    /// Create a new file. Fails if `path` already exists.
    async fn create(&self, path: &str) -> TopologyResult<Box<dyn OutputFile>>;
}

/// An open, append-only output file.
#[async_trait]
pub trait OutputFile: Send + Debug {
    fn path(&self) -> &str;

    async fn write(&mut self, bytes: &[u8]) -> TopologyResult<()>;

    /// Force everything written so far to durable storage.
    async fn sync(&mut self) -> TopologyResult<()>;

    /// Sync and release the file. Further calls are errors.
    async fn close(&mut self) -> TopologyResult<()>;
}

/// Resolve a storage URL to a filesystem.
///
/// Malformed URLs and unknown schemes are configuration errors.
pub fn resolve(url: &str, user: Option<&str>) -> TopologyResult<Arc<dyn FileSystem>> {
    let parsed = Url::parse(url.trim())
        .map_err(|e| TopologyError::invalid_value(crate::config::keys::HDFS_URL, url, e))?;

    match parsed.scheme() {
        "file" => Ok(Arc::new(LocalFileSystem::from_url(&parsed)?)),
        "hdfs" | "webhdfs" => Ok(Arc::new(WebHdfsFileSystem::new(&parsed, "http", user)?)),
        "swebhdfs" => Ok(Arc::new(WebHdfsFileSystem::new(&parsed, "https", user)?)),
        other => Err(TopologyError::invalid_value(
            crate::config::keys::HDFS_URL,
            url,
            format!("unsupported scheme '{other}' (expected file, hdfs, webhdfs or swebhdfs)"),
        )),
    }
}

/// Join a directory and a file name with exactly one `/` between them.
pub fn join_path(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name.trim_start_matches('/'))
}
