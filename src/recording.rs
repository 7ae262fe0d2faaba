//! Local recordings: chunk directories plus a fixed-size `recording.inf` record.
//!
//! Each recording lives in `<base>/<epg id>/`, holding the chunk files written
//! by a [`FileCacheBuffer`] (size factor 255, files kept) and the info record.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Utc};
use streamhold_cache::FileCacheConfig;

/// Name of the metadata file inside a recording directory.
pub const INFO_FILE_NAME: &str = "recording.inf";

/// Window size of recording buffers, in chunks.
pub const RECORDING_SIZE_FACTOR: u32 = 255;

const MAGIC: &[u8; 4] = b"SHRI";
const VERSION: u32 = 1;
const TITLE_LEN: usize = 256;
const DESCRIPTION_LEN: usize = 1024;

/// Size of the encoded record.
pub const RECORD_LEN: usize = 4 + 4 + 4 + 8 + 8 + TITLE_LEN + DESCRIPTION_LEN;

/// Metadata of one local recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingInfo {
    pub channel_id: u32,
    pub title: String,
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub duration_secs: i64,
}

impl RecordingInfo {
    pub fn new(
        channel_id: u32,
        title: impl Into<String>,
        description: impl Into<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            channel_id,
            title: title.into(),
            description: description.into(),
            start_time,
            duration_secs: 0,
        }
    }

    /// Encode as a fixed-size little-endian record. Text fields are
    /// NUL-padded and cut at a character boundary when too long.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(RECORD_LEN);
        buf.put_slice(MAGIC);
        buf.put_u32_le(VERSION);
        buf.put_u32_le(self.channel_id);
        buf.put_i64_le(self.start_time.timestamp());
        buf.put_i64_le(self.duration_secs);
        put_fixed_str(&mut buf, &self.title, TITLE_LEN);
        put_fixed_str(&mut buf, &self.description, DESCRIPTION_LEN);
        buf
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() != RECORD_LEN {
            anyhow::bail!(
                "Recording info has {} bytes, expected {}",
                data.len(),
                RECORD_LEN
            );
        }
        if &data[..4] != MAGIC {
            anyhow::bail!("Recording info has a bad magic number");
        }
        data.advance(4);
        let version = data.get_u32_le();
        if version != VERSION {
            anyhow::bail!("Unsupported recording info version {}", version);
        }
        let channel_id = data.get_u32_le();
        let start = data.get_i64_le();
        let duration_secs = data.get_i64_le();
        let title = get_fixed_str(&mut data, TITLE_LEN);
        let description = get_fixed_str(&mut data, DESCRIPTION_LEN);

        let start_time = DateTime::from_timestamp(start, 0)
            .with_context(|| format!("Recording start time {} is out of range", start))?;

        Ok(Self {
            channel_id,
            title,
            description,
            start_time,
            duration_secs,
        })
    }
}

fn put_fixed_str(buf: &mut BytesMut, value: &str, len: usize) {
    // Keep one NUL terminator.
    let mut end = value.len().min(len - 1);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    buf.put_slice(&value.as_bytes()[..end]);
    buf.put_bytes(0, len - end);
}

fn get_fixed_str(data: &mut &[u8], len: usize) -> String {
    let field = &data[..len];
    let end = field.iter().position(|b| *b == 0).unwrap_or(len);
    let value = String::from_utf8_lossy(&field[..end]).into_owned();
    data.advance(len);
    value
}

/// Directory of the recording for EPG entry `epg_id`.
pub fn directory_for_recording(base: &Path, epg_id: u32) -> PathBuf {
    base.join(epg_id.to_string())
}

/// Path of the info record inside a recording directory.
pub fn info_path(dir: &Path) -> PathBuf {
    dir.join(INFO_FILE_NAME)
}

/// File cache settings for recording into a directory.
pub fn recording_cache_config(base: &FileCacheConfig) -> FileCacheConfig {
    FileCacheConfig {
        size_factor: RECORDING_SIZE_FACTOR,
        auto_delete: false,
        ..base.clone()
    }
}

pub fn write_info(dir: &Path, info: &RecordingInfo) -> Result<()> {
    let path = info_path(dir);
    fs::write(&path, info.encode())
        .with_context(|| format!("Failed to write recording info file {:?}", path))
}

pub fn read_info(dir: &Path) -> Result<RecordingInfo> {
    let path = info_path(dir);
    let data =
        fs::read(&path).with_context(|| format!("Failed to read recording info file {:?}", path))?;
    RecordingInfo::decode(&data).with_context(|| format!("Invalid recording info file {:?}", path))
}

/// Set the duration to the time elapsed between the start and `now`.
pub fn update_duration(dir: &Path, now: DateTime<Utc>) -> Result<RecordingInfo> {
    let mut info = read_info(dir)?;
    info.duration_secs = (now - info.start_time).num_seconds().max(0);
    write_info(dir, &info)?;
    tracing::debug!(
        dir = %dir.display(),
        duration_secs = info.duration_secs,
        "Updated recording duration"
    );
    Ok(info)
}

/// Every recording under `base` with a readable info record.
///
/// Directories without one (or with a damaged one) are skipped.
pub fn list_recordings(base: &Path) -> Result<Vec<(PathBuf, RecordingInfo)>> {
    if !base.is_dir() {
        return Ok(Vec::new());
    }

    let mut recordings = Vec::new();
    for entry in fs::read_dir(base)
        .with_context(|| format!("Failed to list recordings folder {:?}", base))?
    {
        let dir = entry?.path();
        if !dir.is_dir() {
            continue;
        }
        match read_info(&dir) {
            Ok(info) => recordings.push((dir, info)),
            Err(e) => tracing::debug!("Skipping {:?}: {:#}", dir, e),
        }
    }
    recordings.sort_by_key(|(_, info)| info.start_time);
    Ok(recordings)
}

/// Remove a recording directory with its chunk files.
pub fn delete_recording(dir: &Path) -> Result<()> {
    if !info_path(dir).exists() {
        anyhow::bail!("{:?} is not a recording directory", dir);
    }
    fs::remove_dir_all(dir).with_context(|| format!("Failed to delete recording {:?}", dir))?;
    tracing::info!("Deleted recording {:?}", dir);
    Ok(())
}
