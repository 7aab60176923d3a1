//! WebHDFS REST storage for `hdfs://`, `webhdfs://` and `swebhdfs://` URLs.
//!
//! The URL authority must be the namenode's HTTP endpoint (for example
//! `hdfs://nn:9870`); the RPC port is not spoken. Files are created with
//! `op=CREATE&overwrite=false` and grown with `op=APPEND`, following the
//! namenode's redirect to a datanode by hand.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::{Client, Method, StatusCode, header::LOCATION};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

use super::{FileSystem, OutputFile};
use crate::errors::{TopologyError, TopologyResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const API_PREFIX: &str = "/webhdfs/v1";

#[derive(Debug, Clone)]
pub struct WebHdfsFileSystem {
    url: String,
    endpoint: Url,
    user: Option<String>,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct BooleanResponse {
    boolean: bool,
}

impl WebHdfsFileSystem {
    /// `http_scheme` is the scheme used on the wire (`http` or `https`).
    pub fn new(url: &Url, http_scheme: &str, user: Option<&str>) -> TopologyResult<Self> {
        let host = url.host_str().filter(|h| !h.is_empty()).ok_or_else(|| {
            TopologyError::invalid_value(
                crate::config::keys::HDFS_URL,
                url.as_str(),
                "a namenode host is required",
            )
        })?;

        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let endpoint = Url::parse(&format!("{http_scheme}://{authority}"))
            .map_err(|e| TopologyError::invalid_value(crate::config::keys::HDFS_URL, url.as_str(), e))?;

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| TopologyError::configuration(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            url: url.as_str().to_string(),
            endpoint,
            user: user.map(str::to_string),
            client,
        })
    }

    fn op_url(&self, path: &str, op: &str, params: &[(&str, &str)]) -> Url {
        let mut url = self.endpoint.clone();
        url.set_path(&format!("{API_PREFIX}/{}", path.trim_start_matches('/')));
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("op", op);
            if let Some(user) = &self.user {
                query.append_pair("user.name", user);
            }
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        url
    }

    fn unavailable(&self, message: impl Into<String>) -> TopologyError {
        TopologyError::storage_unavailable(&self.url, message)
    }

    /// Send a data-carrying request, following one namenode redirect.
    async fn send_data(&self, method: Method, url: Url, body: Bytes) -> TopologyResult<()> {
        trace!("{} {}", method, url);
        let response = self
            .client
            .request(method.clone(), url)
            .body(body.clone())
            .send()
            .await
            .map_err(|e| self.unavailable(e.to_string()))?;

        let response = if response.status() == StatusCode::TEMPORARY_REDIRECT {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .ok_or_else(|| self.unavailable("redirect without a Location header"))?
                .to_string();
            trace!("{} {} (datanode)", method, location);
            self.client
                .request(method, &location)
                .body(body)
                .send()
                .await
                .map_err(|e| self.unavailable(e.to_string()))?
        } else {
            response
        };

        self.expect_success(response).await.map(|_| ())
    }

    async fn expect_success(&self, response: reqwest::Response) -> TopologyResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response.text().await.unwrap_or_default();
        Err(self.unavailable(format!("HTTP {status}: {}", detail.trim())))
    }
}

#[async_trait]
impl FileSystem for WebHdfsFileSystem {
    fn url(&self) -> &str {
        &self.url
    }

    async fn check_writable(&self, dir: &str) -> TopologyResult<()> {
        let url = self.op_url(dir, "MKDIRS", &[]);
        let response = self
            .client
            .put(url)
            .send()
            .await
            .map_err(|e| self.unavailable(e.to_string()))?;
        let created: BooleanResponse = self
            .expect_success(response)
            .await?
            .json()
            .await
            .map_err(|e| self.unavailable(format!("unexpected MKDIRS response: {e}")))?;

        if !created.boolean {
            return Err(self.unavailable(format!("cannot create directory {dir}")));
        }
        debug!("WebHDFS directory {} is ready on {}", dir, self.url);
        Ok(())
    }

    async fn create(&self, path: &str) -> TopologyResult<Box<dyn OutputFile>> {
        let url = self.op_url(path, "CREATE", &[("overwrite", "false")]);
        self.send_data(Method::PUT, url, Bytes::new()).await?;

        Ok(Box::new(WebHdfsOutputFile {
            fs: self.clone(),
            path: path.to_string(),
            pending: BytesMut::new(),
            closed: false,
        }))
    }
}

/// Bytes are buffered locally and shipped with one `APPEND` per sync.
#[derive(Debug)]
struct WebHdfsOutputFile {
    fs: WebHdfsFileSystem,
    path: String,
    pending: BytesMut,
    closed: bool,
}

impl WebHdfsOutputFile {
    fn ensure_open(&self) -> TopologyResult<()> {
        if self.closed {
            return Err(TopologyError::illegal_state(format!("{} is already closed", self.path)));
        }
        Ok(())
    }
}

#[async_trait]
impl OutputFile for WebHdfsOutputFile {
    fn path(&self) -> &str {
        &self.path
    }

    async fn write(&mut self, bytes: &[u8]) -> TopologyResult<()> {
        self.ensure_open()?;
        self.pending.extend_from_slice(bytes);
        Ok(())
    }

    async fn sync(&mut self) -> TopologyResult<()> {
        self.ensure_open()?;
        if self.pending.is_empty() {
            return Ok(());
        }
        let url = self.fs.op_url(&self.path, "APPEND", &[]);
        let body = self.pending.split().freeze();
        if let Err(e) = self.fs.send_data(Method::POST, url, body.clone()).await {
            // Keep the bytes so a retried sync resends them.
            let mut restored = BytesMut::from(&body[..]);
            restored.extend_from_slice(&self.pending);
            self.pending = restored;
            return Err(e);
        }
        Ok(())
    }

    async fn close(&mut self) -> TopologyResult<()> {
        self.sync().await?;
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fs(url: &str, user: Option<&str>) -> WebHdfsFileSystem {
        WebHdfsFileSystem::new(&Url::parse(url).unwrap(), "http", user).unwrap()
    }

    #[test]
    fn test_op_url_layout() {
        let fs = fs("hdfs://nn:9870", Some("etl"));
        let url = fs.op_url("/data/events/a.txt", "CREATE", &[("overwrite", "false")]);
        assert_eq!(
            url.as_str(),
            "http://nn:9870/webhdfs/v1/data/events/a.txt?op=CREATE&user.name=etl&overwrite=false"
        );
    }

    #[test]
    fn test_default_port_is_omitted() {
        let fs = fs("webhdfs://namenode", None);
        let url = fs.op_url("/tmp", "MKDIRS", &[]);
        assert_eq!(url.as_str(), "http://namenode/webhdfs/v1/tmp?op=MKDIRS");
    }

    #[tokio::test]
    async fn test_unreachable_namenode_is_storage_unavailable() {
        let fs = fs("hdfs://127.0.0.1:1", None);
        let err = fs.check_writable("/data").await.unwrap_err();
        assert!(matches!(err, TopologyError::StorageUnavailable { .. }));
    }
}
