//! Player-facing HLS stream backed by a segment cache and a fetch worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use streamhold_cache::playlist::fetch_text;
use streamhold_cache::{
    ByteStream, FillRequest, Playlist, PlaylistReload, Result, SeekPlan, SegmentCache,
    SegmentCacheDelegate, Transport,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::HlsConfig;

/// Read size used when an HLS stream feeds a byte stream consumer.
const PUMP_READ_SIZE: usize = 32 * 1024;

struct Shared {
    cache: SegmentCache,
    /// Index of the segment being read, if a read is in progress.
    reading: Option<u64>,
}

impl Shared {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut total = 0;
        while total < buf.len() {
            if let Some(index) = self.reading {
                if let Some(segment) = self.cache.filled_segment_mut(index) {
                    let n = segment.read(&mut buf[total..]);
                    if n > 0 {
                        total += n;
                        continue;
                    }
                }
                self.reading = None;
            }

            let index = self.cache.current_index();
            if self.cache.next_segment().is_none() {
                break;
            }
            self.reading = Some(index);
        }
        total
    }
}

/// An HLS playlist presented as a seekable byte stream.
///
/// A background task keeps the segment cache filled; [`read`](Self::read)
/// never waits for it and returns 0 when nothing is buffered yet. The cache
/// lock is never held across a fetch, so reads keep going while a playlist
/// or segment download is in flight.
pub struct HlsStream {
    shared: Arc<Mutex<Shared>>,
    transport: Arc<dyn Transport>,
    position: AtomicU64,
    length: Arc<AtomicU64>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl HlsStream {
    /// Load the playlist at `url` and start fetching segments.
    pub async fn open(
        url: &str,
        delegate: Option<Arc<dyn SegmentCacheDelegate>>,
        transport: Arc<dyn Transport>,
        config: &HlsConfig,
    ) -> Result<Self> {
        let cache = SegmentCache::new(
            url,
            delegate,
            transport.as_ref(),
            config.segment_cache_config(),
        )
        .await?;
        let length = Arc::new(AtomicU64::new(cache.total_length()));
        let shared = Arc::new(Mutex::new(Shared {
            cache,
            reading: None,
        }));
        let cancel = CancellationToken::new();

        let worker = tokio::spawn(run_worker(
            Arc::clone(&shared),
            Arc::clone(&transport),
            Arc::clone(&length),
            config.reload_interval(),
            cancel.clone(),
        ));

        info!(url, "HLS stream opened");
        Ok(Self {
            shared,
            transport,
            position: AtomicU64::new(0),
            length,
            cancel,
            worker: Some(worker),
        })
    }

    /// Copy buffered bytes into `buf`. Returns 0 when no data is ready or the
    /// cache is busy; the caller retries.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let Ok(mut shared) = self.shared.try_lock() else {
            return 0;
        };
        let n = shared.read(buf);
        self.position.fetch_add(n as u64, Ordering::AcqRel);
        self.length
            .store(shared.cache.total_length(), Ordering::Release);
        n
    }

    /// Continue playback from byte `position`. Returns `false` when the
    /// stream cannot be seeked there.
    pub async fn seek(&self, position: u64) -> Result<bool> {
        let target = {
            let mut shared = self.shared.lock().await;
            match shared.cache.plan_seek(position) {
                SeekPlan::Rejected => return Ok(false),
                SeekPlan::Moved => {
                    shared.reading = None;
                    self.seeked(&shared, position);
                    return Ok(true);
                }
                SeekPlan::Timeshift(target) => target,
            }
        };

        let playlist = Playlist::load(self.transport.as_ref(), &target.url).await?;
        let sample = {
            let mut shared = self.shared.lock().await;
            if !shared.cache.repoint(&target, playlist) {
                return Ok(false);
            }
            shared.reading = None;
            shared.cache.offset_sample()
        };

        // A timeshift URL may answer with a VOD playlist.
        if let Some(sample) = sample {
            let sizes = SegmentCache::stat_sample(self.transport.as_ref(), &sample).await;
            self.shared
                .lock()
                .await
                .cache
                .apply_offset_sample(&sample, sizes);
        }

        let shared = self.shared.lock().await;
        self.seeked(&shared, position);
        Ok(true)
    }

    fn seeked(&self, shared: &Shared, position: u64) {
        self.position.store(position, Ordering::Release);
        self.length
            .store(shared.cache.total_length(), Ordering::Release);
        debug!(position, index = shared.cache.current_index(), "HLS seek");
    }

    /// Bytes handed to the player so far, plus any seek target.
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    /// Estimated VOD length, or bytes downloaded so far for live streams.
    pub fn length(&self) -> u64 {
        self.length.load(Ordering::Acquire)
    }

    /// Whether a VOD stream has been read to its last segment.
    pub fn is_eof(&self) -> bool {
        self.shared
            .try_lock()
            .map(|shared| shared.reading.is_none() && shared.cache.is_eof())
            .unwrap_or(false)
    }

    /// Stop the fetch worker and wait for it to exit.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!(error = %e, "HLS worker ended abnormally");
            }
        }
        info!("HLS stream closed");
    }

    /// Feed this stream to a byte stream consumer such as a timeshift buffer.
    pub fn into_byte_stream(self, poll_interval: Duration) -> HlsByteStream {
        HlsByteStream {
            stream: self,
            poll_interval,
        }
    }
}

impl Drop for HlsStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// What the worker does next, decided while holding the cache.
enum Step {
    Fill(FillRequest),
    Reload(PlaylistReload),
    Idle,
}

async fn run_worker(
    shared: Arc<Mutex<Shared>>,
    transport: Arc<dyn Transport>,
    length: Arc<AtomicU64>,
    interval: Duration,
    cancel: CancellationToken,
) {
    debug!("HLS worker started");
    loop {
        let step = next_step(&mut shared.lock().await.cache);

        let request = match step {
            Step::Fill(request) => request,
            Step::Reload(reload) => {
                let fetched = tokio::select! {
                    _ = cancel.cancelled() => break,
                    fetched = fetch_text(transport.as_ref(), &reload.url) => fetched,
                };
                let queued = match fetched {
                    Ok(text) => shared
                        .lock()
                        .await
                        .cache
                        .apply_playlist_update(&reload, &text),
                    Err(e) => Err(e),
                };
                match queued {
                    Ok(0) => {}
                    Ok(_) => continue,
                    Err(e) => warn!(url = %reload.url, error = %e, "Playlist reload failed"),
                }
                if !pause(&cancel, interval).await {
                    break;
                }
                continue;
            }
            Step::Idle => {
                if !pause(&cancel, interval).await {
                    break;
                }
                continue;
            }
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = transport.fetch(request.url()) => result,
        };

        let mut guard = shared.lock().await;
        let failed = match result {
            Ok(body) => match guard.cache.complete_fill(&request, &body) {
                Ok(_) => false,
                Err(e) => {
                    warn!(index = request.index(), error = %e, "Failed to store segment");
                    true
                }
            },
            Err(e) => {
                warn!(
                    index = request.index(),
                    url = %request.url(),
                    error = %e,
                    "Failed to fetch segment"
                );
                true
            }
        };
        if failed {
            guard.cache.abandon_fill(&request);
        }
        length.store(guard.cache.total_length(), Ordering::Release);
        drop(guard);

        if failed && !pause(&cancel, interval).await {
            break;
        }
    }
    debug!("HLS worker stopped");
}

/// Next fetch job; once the queue has run dry, known playlist entries are
/// queued and a live playlist is due for a reload.
fn next_step(cache: &mut SegmentCache) -> Step {
    if let Some(request) = cache.fill_request() {
        return Step::Fill(request);
    }
    if cache.is_full() || !cache.queue_is_empty() {
        return Step::Idle;
    }
    if cache.queue_known_segments() > 0 {
        return cache.fill_request().map_or(Step::Idle, Step::Fill);
    }
    cache.reload_target().map_or(Step::Idle, Step::Reload)
}

/// Sleep for `interval`; `false` once the stream is closing.
async fn pause(cancel: &CancellationToken, interval: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(interval) => true,
    }
}

/// Byte stream view of an [`HlsStream`] that waits for data instead of
/// returning empty reads, and ends with the VOD stream.
pub struct HlsByteStream {
    stream: HlsStream,
    poll_interval: Duration,
}

impl HlsByteStream {
    pub async fn close(self) {
        self.stream.close().await;
    }
}

#[async_trait]
impl ByteStream for HlsByteStream {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        let mut buf = vec![0u8; PUMP_READ_SIZE];
        loop {
            let n = self.stream.read(&mut buf);
            if n > 0 {
                buf.truncate(n);
                return Ok(Some(Bytes::from(buf)));
            }
            if self.stream.is_eof() {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
