use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use streamhold_cache::{FileCacheConfig, SegmentCacheConfig};

const MIB: u64 = 1024 * 1024;
const KIB: usize = 1024;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub hls: HlsConfig,

    #[serde(default)]
    pub timeshift: TimeshiftConfig,

    #[serde(default)]
    pub recordings: RecordingsConfig,

    #[serde(default)]
    pub transport: TransportConfig,
}

/// Segment cache sizing and worker pacing for HLS streams.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HlsConfig {
    /// Segments kept resident unless the player asks for another amount
    #[serde(default = "default_segments_to_cache")]
    pub segments_to_cache: usize,

    /// Bytes reserved per resident segment, in MiB
    #[serde(default = "default_segment_size_mb")]
    pub segment_size_mb: u64,

    /// Pause between worker passes when there is nothing to fetch
    #[serde(default = "default_reload_interval_ms")]
    pub reload_interval_ms: u64,
}

fn default_segments_to_cache() -> usize {
    3
}
fn default_segment_size_mb() -> u64 {
    3
}
fn default_reload_interval_ms() -> u64 {
    1000
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            segments_to_cache: default_segments_to_cache(),
            segment_size_mb: default_segment_size_mb(),
            reload_interval_ms: default_reload_interval_ms(),
        }
    }
}

impl HlsConfig {
    pub fn segment_cache_config(&self) -> SegmentCacheConfig {
        SegmentCacheConfig {
            resident_byte_budget: self.segments_to_cache as u64 * self.segment_size_mb * MIB,
            bytes_per_segment: self.segment_size_mb * MIB,
        }
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_millis(self.reload_interval_ms)
    }
}

/// On-disk window for pausing live streams.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeshiftConfig {
    /// Directory for chunk files (supports `~`)
    #[serde(default = "default_timeshift_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_chunk_size_mb")]
    pub chunk_size_mb: u64,

    #[serde(default = "default_unit_size_kb")]
    pub unit_size_kb: usize,

    /// Window size in chunks (minimum 3)
    #[serde(default = "default_size_factor")]
    pub size_factor: u32,
}

fn default_timeshift_dir() -> PathBuf {
    PathBuf::from("~/.cache/streamhold/timeshift")
}
fn default_chunk_size_mb() -> u64 {
    128
}
fn default_unit_size_kb() -> usize {
    32
}
fn default_size_factor() -> u32 {
    3
}

impl Default for TimeshiftConfig {
    fn default() -> Self {
        Self {
            dir: default_timeshift_dir(),
            chunk_size_mb: default_chunk_size_mb(),
            unit_size_kb: default_unit_size_kb(),
            size_factor: default_size_factor(),
        }
    }
}

impl TimeshiftConfig {
    pub fn file_cache_config(&self) -> FileCacheConfig {
        FileCacheConfig {
            chunk_size: self.chunk_size_mb * MIB,
            unit_size: self.unit_size_kb * KIB,
            size_factor: self.size_factor,
            auto_delete: true,
        }
    }

    /// Chunk directory with `~` expanded.
    pub fn resolved_dir(&self) -> PathBuf {
        expand_path(&self.dir)
    }
}

/// Local recordings of live channels.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordingsConfig {
    /// Base directory; each recording gets a subdirectory (supports `~`)
    #[serde(default = "default_recordings_dir")]
    pub dir: PathBuf,
}

fn default_recordings_dir() -> PathBuf {
    PathBuf::from("~/.local/share/streamhold/recordings")
}

impl Default for RecordingsConfig {
    fn default() -> Self {
        Self {
            dir: default_recordings_dir(),
        }
    }
}

impl RecordingsConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        expand_path(&self.dir)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("streamhold/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl TransportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn expand_path(path: &std::path::Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(raw.as_ref()).as_ref())
}
