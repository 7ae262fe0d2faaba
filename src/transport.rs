//! HTTP and local-file transport for the caches.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, Response};
use streamhold_cache::{ByteStream, Error, Result, Transport};
use tokio::io::AsyncReadExt;

use crate::config::TransportConfig;

/// Read size for `file://` streams.
const FILE_CHUNK_SIZE: usize = 64 * 1024;

/// Fetches `http(s)://` URLs with reqwest and `file://` URLs from disk.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    stream_client: Client,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client with timeout: {}", e);
                Client::new()
            });

        // Live streams run for as long as the channel is watched; only the
        // connect phase is bounded.
        let stream_client = Client::builder()
            .connect_timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build streaming HTTP client: {}", e);
                Client::new()
            });

        Self {
            client,
            stream_client,
        }
    }

    async fn get(&self, url: &str) -> Result<Response> {
        self.client
            .get(url)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(|e| Error::transport(format!("GET {url}: {e}")))
    }

    async fn stat_with_range(&self, url: &str) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .header(RANGE, "bytes=0-0")
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(|e| Error::transport(format!("ranged GET {url}: {e}")))?;

        // "bytes 0-0/12345"
        response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.rsplit('/').next())
            .and_then(|total| total.trim().parse().ok())
            .ok_or_else(|| Error::transport(format!("no size available for {url}")))
    }
}

fn local_path(url: &str) -> Option<PathBuf> {
    url.strip_prefix("file://").map(PathBuf::from)
}

fn file_error(action: &str, path: &Path, e: io::Error) -> Error {
    Error::transport(format!("{action} {}: {e}", path.display()))
}

fn header_length(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        if let Some(path) = local_path(url) {
            let body = tokio::fs::read(&path)
                .await
                .map_err(|e| file_error("reading", &path, e))?;
            return Ok(body.into());
        }

        let response = self.get(url).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::transport(format!("reading body of {url}: {e}")))?;
        tracing::debug!(url, bytes = body.len(), "Fetched");
        Ok(body)
    }

    async fn stat(&self, url: &str) -> Result<u64> {
        if let Some(path) = local_path(url) {
            let metadata = tokio::fs::metadata(&path)
                .await
                .map_err(|e| file_error("stat of", &path, e))?;
            return Ok(metadata.len());
        }

        match self.client.head(url).send().await {
            Ok(response) if response.status().is_success() => {
                if let Some(length) = header_length(&response) {
                    return Ok(length);
                }
                tracing::debug!(url, "HEAD without Content-Length, trying ranged GET");
            }
            Ok(response) => {
                tracing::debug!(
                    url,
                    status = %response.status(),
                    "HEAD rejected, trying ranged GET"
                );
            }
            Err(e) => {
                tracing::debug!(url, error = %e, "HEAD failed, trying ranged GET");
            }
        }
        self.stat_with_range(url).await
    }

    async fn open_stream(&self, url: &str) -> Result<Box<dyn ByteStream>> {
        if let Some(path) = local_path(url) {
            let file = tokio::fs::File::open(&path)
                .await
                .map_err(|e| file_error("opening", &path, e))?;
            return Ok(Box::new(FileStream { file, path }));
        }

        let response = self
            .stream_client
            .get(url)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(|e| Error::transport(format!("GET {url}: {e}")))?;
        tracing::info!(url, "Opened live stream");
        Ok(Box::new(HttpStream { response }))
    }
}

struct HttpStream {
    response: Response,
}

#[async_trait]
impl ByteStream for HttpStream {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        self.response
            .chunk()
            .await
            .map_err(|e| Error::transport(format!("stream read: {e}")))
    }
}

struct FileStream {
    file: tokio::fs::File,
    path: PathBuf,
}

#[async_trait]
impl ByteStream for FileStream {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        let mut buf = BytesMut::with_capacity(FILE_CHUNK_SIZE);
        let n = self
            .file
            .read_buf(&mut buf)
            .await
            .map_err(|e| file_error("reading", &self.path, e))?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(buf.freeze()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_path() {
        assert_eq!(
            local_path("file:///tmp/list.m3u8"),
            Some(PathBuf::from("/tmp/list.m3u8"))
        );
        assert_eq!(local_path("http://example.com/list.m3u8"), None);
    }

    #[tokio::test]
    async fn test_file_urls_are_read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg0.ts");
        std::fs::write(&path, b"0123456789").unwrap();
        let url = format!("file://{}", path.display());

        let transport = HttpTransport::new(&TransportConfig::default());
        assert_eq!(transport.fetch(&url).await.unwrap(), "0123456789");
        assert_eq!(transport.stat(&url).await.unwrap(), 10);

        let mut stream = transport.open_stream(&url).await.unwrap();
        assert_eq!(stream.next_chunk().await.unwrap().unwrap(), "0123456789");
        assert!(stream.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_file_is_transport_error() {
        let transport = HttpTransport::new(&TransportConfig::default());
        let url = "file:///nonexistent/streamhold/seg.ts";

        assert!(matches!(transport.fetch(url).await, Err(Error::Transport(_))));
        assert!(matches!(transport.stat(url).await, Err(Error::Transport(_))));
        assert!(matches!(
            transport.open_stream(url).await,
            Err(Error::Transport(_))
        ));
    }
}
