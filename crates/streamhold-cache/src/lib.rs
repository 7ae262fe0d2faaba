//! Streamhold-Cache: buffering layer for segmented and continuous media streams
//!
//! This crate holds the parts of streamhold that keep bytes around while a
//! stream is being downloaded and played at the same time, with bounded
//! storage.
//!
//! # Modules
//!
//! - `playlist` - M3U8 parsing, variant selection, live reload merge
//! - `segment` - in-memory segment buffers (append, then seek/read)
//! - `segment_cache` - fetch scheduling, VOD bitrate bootstrap, time seeking, eviction
//! - `file_cache` - sliding window of on-disk chunk files for timeshift
//! - `transport` - the fetch interface the caches consume
//!
//! # Architecture
//!
//! Two independent caches live here:
//!
//! 1. The segment cache turns a playlist into a queue of segment descriptors,
//!    hands them out to a fetcher one at a time, and exposes filled segments to
//!    the player in index order. Segments outside the resident byte budget are
//!    freed (VOD, metadata kept for offset math) or erased (live).
//! 2. The file cache accepts a raw byte stream in fixed-size units, appends it
//!    to `TimeshiftBuffer-<n>.bin` chunk files and serves positional reads over
//!    the trailing window. Whole chunks fall off the front once the window is
//!    over budget.
//!
//! Neither cache blocks: "no data yet" is a zero-length read or `None`.

pub mod error;
pub mod file_cache;
pub mod playlist;
pub mod segment;
pub mod segment_cache;
pub mod transport;

pub use error::{Error, Result};
pub use file_cache::{FileCacheBuffer, FileCacheConfig, WriteUnit};
pub use playlist::{Playlist, SegmentInfo};
pub use segment::{MutableSegment, Segment};
pub use segment_cache::{
    FillRequest, OffsetSample, PlaylistReload, SeekPlan, SegmentCache, SegmentCacheConfig,
    SegmentCacheDelegate, TimeshiftTarget,
};
pub use transport::{ByteStream, MemoryTransport, Transport};
