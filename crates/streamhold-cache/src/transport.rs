//! Fetch interface consumed by the caches.
//!
//! The caches never talk to the network themselves. They ask a [`Transport`]
//! for whole bodies (playlists, segments), for sizes (VOD bitrate bootstrap),
//! or for a chunked byte stream (live timeshift input).

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Fetches bytes addressed by URL.
///
/// Implementations must be cheap to share behind an `Arc`; every method may
/// suspend, so callers run them on the async executor and never while holding
/// a cache lock that the playback thread needs.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch the whole body at `url`.
    async fn fetch(&self, url: &str) -> Result<Bytes>;

    /// Size in bytes of the body at `url`, without downloading it.
    async fn stat(&self, url: &str) -> Result<u64>;

    /// Open `url` as an unbounded stream of chunks.
    async fn open_stream(&self, url: &str) -> Result<Box<dyn ByteStream>>;
}

/// A chunked byte source, e.g. a live MPEG-TS feed.
#[async_trait]
pub trait ByteStream: Send {
    /// Next chunk of the stream, `None` once the source has ended.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>>;
}

/// In-memory transport serving registered bodies and streams.
///
/// Re-registering a URL replaces its body, which is how a live playlist that
/// grows between reloads is modelled.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    bodies: HashMap<String, Bytes>,
    streams: HashMap<String, Vec<Bytes>>,
    stat_failures: HashSet<String>,
    fetched: Vec<String>,
}

impl MemoryTransport {
    /// Create an empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the body served for `url`.
    pub fn insert(&self, url: impl Into<String>, body: impl Into<Bytes>) {
        self.inner.lock().bodies.insert(url.into(), body.into());
    }

    /// Make `stat` fail for `url` while `fetch` keeps working.
    pub fn fail_stat(&self, url: impl Into<String>) {
        self.inner.lock().stat_failures.insert(url.into());
    }

    /// Register the chunks a stream opened on `url` will yield.
    pub fn insert_stream(&self, url: impl Into<String>, chunks: Vec<Bytes>) {
        self.inner.lock().streams.insert(url.into(), chunks);
    }

    /// Number of successful and failed `fetch` calls for `url`.
    pub fn fetch_count(&self, url: &str) -> usize {
        self.inner.lock().fetched.iter().filter(|u| *u == url).count()
    }

    /// Every URL passed to `fetch`, in call order.
    pub fn fetched(&self) -> Vec<String> {
        self.inner.lock().fetched.clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let mut state = self.inner.lock();
        state.fetched.push(url.to_string());
        state
            .bodies
            .get(url)
            .cloned()
            .ok_or_else(|| Error::transport(format!("no body registered for {url}")))
    }

    async fn stat(&self, url: &str) -> Result<u64> {
        let state = self.inner.lock();
        if state.stat_failures.contains(url) {
            return Err(Error::transport(format!("stat failed for {url}")));
        }
        state
            .bodies
            .get(url)
            .map(|body| body.len() as u64)
            .ok_or_else(|| Error::transport(format!("no body registered for {url}")))
    }

    async fn open_stream(&self, url: &str) -> Result<Box<dyn ByteStream>> {
        let chunks = self
            .inner
            .lock()
            .streams
            .get(url)
            .cloned()
            .ok_or_else(|| Error::transport(format!("no stream registered for {url}")))?;
        Ok(Box::new(MemoryStream {
            chunks: chunks.into(),
        }))
    }
}

struct MemoryStream {
    chunks: VecDeque<Bytes>,
}

#[async_trait]
impl ByteStream for MemoryStream {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        Ok(self.chunks.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_and_stat() {
        let transport = MemoryTransport::new();
        transport.insert("http://host/a.ts", vec![0u8; 10]);

        let body = transport.fetch("http://host/a.ts").await.unwrap();
        assert_eq!(body.len(), 10);
        assert_eq!(transport.stat("http://host/a.ts").await.unwrap(), 10);
        assert_eq!(transport.fetch_count("http://host/a.ts"), 1);

        assert!(matches!(
            transport.fetch("http://host/missing.ts").await,
            Err(Error::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_stat_failure_leaves_fetch_working() {
        let transport = MemoryTransport::new();
        transport.insert("http://host/a.ts", "abc");
        transport.fail_stat("http://host/a.ts");

        assert!(transport.stat("http://host/a.ts").await.is_err());
        assert!(transport.fetch("http://host/a.ts").await.is_ok());
    }

    #[tokio::test]
    async fn test_stream_yields_chunks_then_ends() {
        let transport = MemoryTransport::new();
        transport.insert_stream(
            "http://host/live",
            vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")],
        );

        let mut stream = transport.open_stream("http://host/live").await.unwrap();
        assert_eq!(stream.next_chunk().await.unwrap().unwrap(), "ab");
        assert_eq!(stream.next_chunk().await.unwrap().unwrap(), "cd");
        assert!(stream.next_chunk().await.unwrap().is_none());
    }
}
