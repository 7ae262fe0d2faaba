//! Live stream pumped into a file-backed window for pause and rewind.

use std::io::SeekFrom;
use std::sync::Arc;

use streamhold_cache::{ByteStream, FileCacheBuffer, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Copies a live byte stream into a [`FileCacheBuffer`] on a background task
/// while the player reads behind it.
pub struct TimeshiftBuffer {
    cache: Arc<FileCacheBuffer>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<Result<u64>>>,
}

impl TimeshiftBuffer {
    /// Start pumping `source` into `cache`. Must be called inside a tokio
    /// runtime.
    pub fn start(source: Box<dyn ByteStream>, cache: FileCacheBuffer) -> Self {
        let cache = Arc::new(cache);
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(pump(source, Arc::clone(&cache), cancel.clone()));
        info!(dir = %cache.dir().display(), "Timeshift started");
        Self {
            cache,
            cancel,
            worker: Some(worker),
        }
    }

    /// Read behind the writer. Returns 0 when the reader caught up.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.cache.read(buf)
    }

    pub fn seek(&self, pos: SeekFrom) -> Result<u64> {
        self.cache.seek(pos)
    }

    pub fn position(&self) -> u64 {
        self.cache.position()
    }

    pub fn length(&self) -> u64 {
        self.cache.length()
    }

    /// Oldest position still available for rewinding.
    pub fn begin(&self) -> u64 {
        self.cache.begin()
    }

    /// Whether the source ended or failed.
    pub fn is_finished(&self) -> bool {
        self.worker
            .as_ref()
            .map_or(true, |worker| worker.is_finished())
    }

    /// Stop the pump and return the number of bytes it stored.
    pub async fn stop(mut self) -> Result<u64> {
        self.cancel.cancel();
        let Some(worker) = self.worker.take() else {
            return Ok(0);
        };
        match worker.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Timeshift pump panicked");
                Ok(self.cache.length())
            }
        }
    }
}

impl Drop for TimeshiftBuffer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Fill whole units from the source and append them. A partial unit is
/// flushed when the source ends or the pump is stopped.
async fn pump(
    mut source: Box<dyn ByteStream>,
    cache: Arc<FileCacheBuffer>,
    cancel: CancellationToken,
) -> Result<u64> {
    let mut unit = cache.lock_unit_for_write()?;
    let mut filled = 0usize;
    let mut stored = 0u64;

    let outcome = loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            chunk = source.next_chunk() => chunk,
        };
        let chunk = match chunk {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                debug!("Timeshift source ended");
                break Ok(());
            }
            Err(e) => {
                error!(error = %e, "Timeshift source failed");
                break Err(e);
            }
        };

        let mut data = &chunk[..];
        while !data.is_empty() {
            let n = data.len().min(unit.len() - filled);
            unit[filled..filled + n].copy_from_slice(&data[..n]);
            filled += n;
            data = &data[n..];

            if filled == unit.len() {
                stored += cache.unlock_after_written(unit, None)? as u64;
                unit = cache.lock_unit_for_write()?;
                filled = 0;
            }
        }
    };

    stored += cache.unlock_after_written(unit, Some(filled))? as u64;
    info!(stored, length = cache.length(), "Timeshift pump stopped");
    outcome.map(|()| stored)
}
