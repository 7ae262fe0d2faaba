//! File-backed sliding window for continuous streams.
//!
//! A [`FileCacheBuffer`] appends a raw byte stream to fixed-size chunk files
//! (`TimeshiftBuffer-<n>.bin`) and serves positional reads over the retained
//! window. When the window reaches its budget the oldest chunk is dropped and
//! the logical start (`begin`) moves forward by one chunk.
//!
//! The writer works in units: it borrows the single scratch buffer with
//! [`FileCacheBuffer::lock_unit_for_write`], fills it, and hands it back with
//! [`FileCacheBuffer::unlock_after_written`], which appends the bytes.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::iter::Peekable;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::str::Chars;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

/// Default size of one chunk file.
pub const DEFAULT_CHUNK_SIZE: u64 = 128 * 1024 * 1024;

/// Default size of the write unit.
pub const DEFAULT_UNIT_SIZE: usize = 32 * 1024;

/// Smallest window, in chunks.
const MIN_WINDOW_CHUNKS: u64 = 3;

const CHUNK_PREFIX: &str = "TimeshiftBuffer-";
const CHUNK_EXTENSION: &str = "bin";

/// Geometry and retention of a file cache.
#[derive(Debug, Clone)]
pub struct FileCacheConfig {
    /// Bytes per chunk file.
    pub chunk_size: u64,
    /// Bytes per write unit.
    pub unit_size: usize,
    /// Window size in chunks; values below 3 are raised to 3.
    pub size_factor: u32,
    /// Remove chunk files when they are evicted or the buffer is dropped.
    pub auto_delete: bool,
}

impl Default for FileCacheConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            unit_size: DEFAULT_UNIT_SIZE,
            size_factor: MIN_WINDOW_CHUNKS as u32,
            auto_delete: true,
        }
    }
}

impl FileCacheConfig {
    /// Bytes retained before the oldest chunk is evicted.
    pub fn max_window(&self) -> u64 {
        u64::from(self.size_factor).max(MIN_WINDOW_CHUNKS) * self.chunk_size
    }

    fn check(&self) -> Result<()> {
        if self.chunk_size == 0 || self.unit_size == 0 {
            return Err(Error::state("chunk and unit sizes must be non-zero"));
        }
        Ok(())
    }
}

type UnitSlot = Arc<Mutex<Option<Box<[u8]>>>>;

/// The scratch buffer lent to the writer.
///
/// Dereferences to a byte slice of `unit_size` bytes. Dropping a unit returns
/// it to the buffer it was borrowed from.
#[derive(Debug)]
pub struct WriteUnit {
    home: UnitSlot,
    data: Option<Box<[u8]>>,
}

impl WriteUnit {
    fn belongs_to(&self, slot: &UnitSlot) -> bool {
        Arc::ptr_eq(&self.home, slot)
    }
}

impl Deref for WriteUnit {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for WriteUnit {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for WriteUnit {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            *self.home.lock() = Some(data);
        }
    }
}

#[derive(Debug)]
enum ChunkHandle {
    Open(File),
    Closed,
}

/// One chunk file on disk.
#[derive(Debug)]
struct ChunkFile {
    path: PathBuf,
    handle: ChunkHandle,
    written: u64,
    auto_delete: bool,
}

impl ChunkFile {
    fn create(path: PathBuf, auto_delete: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        debug!(path = %path.display(), "Created chunk file");
        Ok(Self {
            path,
            handle: ChunkHandle::Open(file),
            written: 0,
            auto_delete,
        })
    }

    fn existing(path: PathBuf) -> Result<Self> {
        let written = fs::metadata(&path)?.len();
        Ok(Self {
            path,
            handle: ChunkHandle::Closed,
            written,
            auto_delete: false,
        })
    }

    fn close(&mut self) {
        if matches!(self.handle, ChunkHandle::Open(_)) {
            debug!(path = %self.path.display(), "Closing chunk writer");
        }
        self.handle = ChunkHandle::Closed;
    }

    /// Reopen a closed chunk for reading.
    fn reopen(&mut self) -> Result<&mut File> {
        if let ChunkHandle::Closed = self.handle {
            self.handle = ChunkHandle::Open(File::open(&self.path)?);
        }
        match &mut self.handle {
            ChunkHandle::Open(file) => Ok(file),
            ChunkHandle::Closed => Err(Error::state("chunk handle closed")),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let offset = self.written;
        let ChunkHandle::Open(file) = &mut self.handle else {
            return Err(Error::state(format!(
                "chunk {} is closed for writing",
                self.path.display()
            )));
        };
        file.seek(SeekFrom::Start(offset))?;
        let n = file.write(data)?;
        self.written += n as u64;
        Ok(n)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.written || buf.is_empty() {
            return Ok(0);
        }
        let available = ((self.written - offset) as usize).min(buf.len());
        let file = self.reopen()?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(file.read(&mut buf[..available])?)
    }
}

impl Drop for ChunkFile {
    fn drop(&mut self) {
        self.close();
        if self.auto_delete {
            match fs::remove_file(&self.path) {
                Ok(()) => debug!(path = %self.path.display(), "Removed chunk file"),
                Err(e) => warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove chunk file"
                ),
            }
        }
    }
}

#[derive(Debug)]
struct ChunkWindow {
    chunks: VecDeque<ChunkFile>,
    next_id: u64,
}

impl ChunkWindow {
    fn create_chunk(&mut self, dir: &Path, auto_delete: bool) -> Result<ChunkFile> {
        loop {
            let path = dir.join(format!("{CHUNK_PREFIX}{}.{CHUNK_EXTENSION}", self.next_id));
            self.next_id += 1;
            match ChunkFile::create(path, auto_delete) {
                Err(Error::Storage(e)) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                result => return result,
            }
        }
    }
}

/// Sliding window of chunk files with one writer and one reader.
///
/// `position()`, `length()` and `begin()` are lock-free; everything touching
/// chunk files goes through one mutex.
#[derive(Debug)]
pub struct FileCacheBuffer {
    dir: PathBuf,
    config: FileCacheConfig,
    read_only: bool,
    max_window: u64,
    window: Mutex<ChunkWindow>,
    unit: UnitSlot,
    position: AtomicU64,
    length: AtomicU64,
    begin: AtomicU64,
}

impl FileCacheBuffer {
    /// Create a writable buffer in `dir`, creating the directory if needed.
    pub fn new(dir: impl AsRef<Path>, config: FileCacheConfig) -> Result<Self> {
        config.check()?;
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).inspect_err(|e| {
            error!(dir = %dir.display(), error = %e, "Failed to create cache directory");
        })?;

        let max_window = config.max_window();
        info!(
            dir = %dir.display(),
            chunk_size = config.chunk_size,
            max_window,
            auto_delete = config.auto_delete,
            "File cache created"
        );
        Ok(Self::build(dir, config, false, max_window, VecDeque::new(), 0))
    }

    /// Open the chunk files already in `dir` for reading only.
    ///
    /// Files are ordered by a natural sort of their names and are never
    /// deleted by this buffer.
    pub fn open(dir: impl AsRef<Path>, config: FileCacheConfig) -> Result<Self> {
        config.check()?;
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(Error::Storage(io::Error::new(
                io::ErrorKind::NotFound,
                format!("cache directory {} does not exist", dir.display()),
            )));
        }

        let mut names: Vec<String> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| {
                Path::new(name)
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(CHUNK_EXTENSION))
            })
            .collect();
        names.sort_by(|a, b| natural_cmp(a, b));

        let chunks = names
            .into_iter()
            .map(|name| ChunkFile::existing(dir.join(name)))
            .collect::<Result<VecDeque<_>>>()?;
        let length: u64 = chunks.iter().map(|chunk| chunk.written).sum();

        // Every chunk but the last is full, so the first one tells the size
        // the files were written with.
        let mut config = config;
        if chunks.len() > 1 && chunks[0].written > 0 && chunks[0].written != config.chunk_size {
            debug!(
                configured = config.chunk_size,
                found = chunks[0].written,
                "Using chunk size found on disk"
            );
            config.chunk_size = chunks[0].written;
        }

        info!(dir = %dir.display(), chunks = chunks.len(), length, "Opened file cache read-only");
        Ok(Self::build(dir, config, true, length, chunks, length))
    }

    fn build(
        dir: PathBuf,
        config: FileCacheConfig,
        read_only: bool,
        max_window: u64,
        chunks: VecDeque<ChunkFile>,
        length: u64,
    ) -> Self {
        let unit = vec![0u8; config.unit_size].into_boxed_slice();
        Self {
            dir,
            config,
            read_only,
            max_window,
            window: Mutex::new(ChunkWindow { chunks, next_id: 0 }),
            unit: Arc::new(Mutex::new(Some(unit))),
            position: AtomicU64::new(0),
            length: AtomicU64::new(length),
            begin: AtomicU64::new(0),
        }
    }

    /// Borrow the write unit.
    pub fn lock_unit_for_write(&self) -> Result<WriteUnit> {
        if self.read_only {
            return Err(Error::state("file cache is read-only"));
        }
        let data = self
            .unit
            .lock()
            .take()
            .ok_or_else(|| Error::state("write unit is already locked"))?;
        Ok(WriteUnit {
            home: Arc::clone(&self.unit),
            data: Some(data),
        })
    }

    /// Return the write unit and append its first `written` bytes (the whole
    /// unit for `None`). Returns how many bytes were appended.
    ///
    /// A unit borrowed from another buffer is rejected and goes back to that
    /// buffer unwritten.
    pub fn unlock_after_written(&self, unit: WriteUnit, written: Option<usize>) -> Result<usize> {
        if !unit.belongs_to(&self.unit) {
            return Err(Error::state("write unit belongs to another buffer"));
        }
        let count = written.unwrap_or(unit.len()).min(unit.len());
        self.append(&unit[..count])
    }

    fn append(&self, data: &[u8]) -> Result<usize> {
        let chunk_size = self.config.chunk_size;
        let mut window = self.window.lock();
        let mut length = self.length.load(AtomicOrdering::Acquire);
        let mut begin = self.begin.load(AtomicOrdering::Acquire);
        let mut done = 0usize;
        let mut outcome = Ok(());

        while done < data.len() {
            let needs_chunk = window
                .chunks
                .back()
                .map_or(true, |tail| tail.written >= chunk_size);
            if needs_chunk {
                if length - begin >= self.max_window {
                    warn!(
                        length,
                        begin,
                        dropped = data.len() - done,
                        "Chunk window full, write truncated"
                    );
                    break;
                }
                match window.create_chunk(&self.dir, self.config.auto_delete) {
                    Ok(chunk) => window.chunks.push_back(chunk),
                    Err(e) => {
                        error!(
                            dir = %self.dir.display(),
                            error = %e,
                            "Failed to create chunk file"
                        );
                        outcome = Err(e);
                        break;
                    }
                }
            }

            let Some(tail) = window.chunks.back_mut() else {
                break;
            };
            let room = (chunk_size - tail.written).min((data.len() - done) as u64) as usize;
            match tail.write(&data[done..done + room]) {
                Ok(n) => {
                    done += n;
                    length += n as u64;
                    if tail.written >= chunk_size {
                        tail.close();
                    }
                    if n < room {
                        warn!(expected = room, written = n, "Short write to chunk file");
                        break;
                    }
                }
                Err(e) => {
                    error!(path = %tail.path.display(), error = %e, "Failed to write chunk file");
                    break;
                }
            }
        }

        while length - begin >= self.max_window {
            let Some(evicted) = window.chunks.pop_front() else {
                break;
            };
            begin += chunk_size;
            debug!(path = %evicted.path.display(), begin, "Evicted oldest chunk");
        }

        self.length.store(length, AtomicOrdering::Release);
        self.begin.store(begin, AtomicOrdering::Release);
        outcome.map(|()| done)
    }

    /// Move the reader, clamped into `[begin, length]`. Returns the new
    /// position.
    pub fn seek(&self, pos: SeekFrom) -> Result<u64> {
        let window = self.window.lock();
        let begin = self.begin.load(AtomicOrdering::Acquire);
        let length = self.length.load(AtomicOrdering::Acquire);
        let current = self.position.load(AtomicOrdering::Acquire);

        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(current) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(length) + i128::from(delta),
        };
        let position = target.clamp(i128::from(begin), i128::from(length)) as u64;

        let index = self.chunk_index_for(position) as usize;
        let at_open_end = position == length && self.position_in_chunk_for(position) == 0;
        if index >= window.chunks.len() && !at_open_end {
            return Err(Error::state(format!(
                "position {position} maps to missing chunk {index}"
            )));
        }

        self.position.store(position, AtomicOrdering::Release);
        Ok(position)
    }

    /// Read from the reader position, crossing into the next chunk only once
    /// the current one is complete. Returns 0 when no data is available yet.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let chunk_size = self.config.chunk_size;
        let mut window = self.window.lock();
        let begin = self.begin.load(AtomicOrdering::Acquire);
        let length = self.length.load(AtomicOrdering::Acquire);
        let mut position = self.position.load(AtomicOrdering::Acquire).max(begin);
        let mut total = 0;

        while total < buf.len() && position < length {
            let index = ((position - begin) / chunk_size) as usize;
            let offset = (position - begin) % chunk_size;
            let Some(chunk) = window.chunks.get_mut(index) else {
                break;
            };
            let n = chunk.read_at(offset, &mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
            position += n as u64;
        }

        self.position.store(position, AtomicOrdering::Release);
        Ok(total)
    }

    /// Index into the window of the chunk holding logical position `pos`.
    pub fn chunk_index_for(&self, pos: u64) -> u64 {
        pos.saturating_sub(self.begin()) / self.config.chunk_size
    }

    /// Offset of logical position `pos` inside its chunk.
    pub fn position_in_chunk_for(&self, pos: u64) -> u64 {
        pos.saturating_sub(self.begin()) % self.config.chunk_size
    }

    /// Reader position.
    pub fn position(&self) -> u64 {
        self.position.load(AtomicOrdering::Acquire)
    }

    /// Total bytes ever appended (or found on disk for a read-only buffer).
    pub fn length(&self) -> u64 {
        self.length.load(AtomicOrdering::Acquire)
    }

    /// Logical position of the oldest retained byte.
    pub fn begin(&self) -> u64 {
        self.begin.load(AtomicOrdering::Acquire)
    }

    /// Retention budget in bytes.
    pub fn max_window(&self) -> u64 {
        self.max_window
    }

    /// Size of the write unit.
    pub fn unit_size(&self) -> usize {
        self.config.unit_size
    }

    /// Number of chunk files in the window.
    pub fn chunk_count(&self) -> usize {
        self.window.lock().chunks.len()
    }

    /// Directory holding the chunk files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether the buffer was opened over existing files.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// Compare file names treating digit runs as numbers and letters without
/// regard to ASCII case.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a = a.chars().peekable();
    let mut b = b.chars().peekable();
    loop {
        match (a.peek().copied(), b.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let left = take_digits(&mut a);
                let right = take_digits(&mut b);
                let left = left.trim_start_matches('0');
                let right = right.trim_start_matches('0');
                let ord = left.len().cmp(&right.len()).then_with(|| left.cmp(right));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                let ord = x.to_ascii_lowercase().cmp(&y.to_ascii_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                a.next();
                b.next();
            }
        }
    }
}

fn take_digits(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.next_if(char::is_ascii_digit) {
        digits.push(c);
    }
    digits
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(chunk_size: u64, unit_size: usize) -> FileCacheConfig {
        FileCacheConfig {
            chunk_size,
            unit_size,
            size_factor: 3,
            auto_delete: true,
        }
    }

    fn write(buffer: &FileCacheBuffer, data: &[u8]) -> usize {
        let mut unit = buffer.lock_unit_for_write().unwrap();
        unit[..data.len()].copy_from_slice(data);
        buffer.unlock_after_written(unit, Some(data.len())).unwrap()
    }

    #[test]
    fn test_natural_cmp() {
        let mut names = vec!["b10.bin", "B2.bin", "a1.bin", "b1.bin"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["a1.bin", "b1.bin", "B2.bin", "b10.bin"]);
        assert_eq!(natural_cmp("x007", "x7"), Ordering::Equal);
        assert_eq!(natural_cmp("x", "x1"), Ordering::Less);
    }

    #[test]
    fn test_max_window_has_three_chunk_floor() {
        let mut cfg = config(10, 4);
        cfg.size_factor = 1;
        assert_eq!(cfg.max_window(), 30);
        cfg.size_factor = 255;
        assert_eq!(cfg.max_window(), 2550);
    }

    #[test]
    fn test_write_rolls_over_chunks() {
        let dir = TempDir::new().unwrap();
        let buffer = FileCacheBuffer::new(dir.path(), config(4, 6)).unwrap();

        assert_eq!(write(&buffer, b"abcdef"), 6);
        assert_eq!(buffer.length(), 6);
        assert_eq!(buffer.chunk_count(), 2);
        assert!(dir.path().join("TimeshiftBuffer-0.bin").exists());
        assert!(dir.path().join("TimeshiftBuffer-1.bin").exists());
        assert_eq!(fs::read(dir.path().join("TimeshiftBuffer-0.bin")).unwrap(), b"abcd");
    }

    #[test]
    fn test_chunk_names_skip_existing_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("TimeshiftBuffer-0.bin"), b"old").unwrap();
        let buffer = FileCacheBuffer::new(dir.path(), config(4, 4)).unwrap();

        write(&buffer, b"new!");
        assert_eq!(fs::read(dir.path().join("TimeshiftBuffer-0.bin")).unwrap(), b"old");
        assert_eq!(fs::read(dir.path().join("TimeshiftBuffer-1.bin")).unwrap(), b"new!");
    }

    #[test]
    fn test_double_lock_is_rejected() {
        let dir = TempDir::new().unwrap();
        let buffer = FileCacheBuffer::new(dir.path(), config(4, 4)).unwrap();

        let unit = buffer.lock_unit_for_write().unwrap();
        assert!(matches!(buffer.lock_unit_for_write(), Err(Error::State(_))));
        buffer.unlock_after_written(unit, Some(0)).unwrap();
        assert!(buffer.lock_unit_for_write().is_ok());
    }

    #[test]
    fn test_seek_is_clamped_to_window() {
        let dir = TempDir::new().unwrap();
        let buffer = FileCacheBuffer::new(dir.path(), config(4, 8)).unwrap();
        write(&buffer, b"01234567");

        assert_eq!(buffer.seek(SeekFrom::Start(100)).unwrap(), 8);
        assert_eq!(buffer.seek(SeekFrom::End(-3)).unwrap(), 5);
        assert_eq!(buffer.seek(SeekFrom::Current(-10)).unwrap(), 0);

        let mut buf = [0u8; 3];
        buffer.seek(SeekFrom::Start(3)).unwrap();
        assert_eq!(buffer.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"345");
        assert_eq!(buffer.position(), 6);
    }

    #[test]
    fn test_dropping_buffer_removes_chunks() {
        let dir = TempDir::new().unwrap();
        {
            let buffer = FileCacheBuffer::new(dir.path(), config(4, 8)).unwrap();
            write(&buffer, b"01234567");
        }
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_kept_chunks_survive_drop() {
        let dir = TempDir::new().unwrap();
        {
            let mut cfg = config(4, 8);
            cfg.auto_delete = false;
            let buffer = FileCacheBuffer::new(dir.path(), cfg).unwrap();
            write(&buffer, b"01234567");
        }
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }
}
