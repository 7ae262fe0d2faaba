//! Segment fetch scheduling and playback cursor over an HLS playlist.
//!
//! The cache owns the playlist, a queue of descriptors waiting to be fetched
//! and the resident segment slots keyed by playlist index. A fetcher asks for
//! work through [`SegmentCache::fill_request`], downloads outside any lock and
//! hands the bytes back with [`SegmentCache::complete_fill`]. The player pulls
//! filled segments in index order through [`SegmentCache::next_segment`].
//!
//! VOD streams get a bitrate estimate at start-up from the sizes of the first
//! few segments, which gives every slot a time offset and an estimated byte
//! length. Byte positions requested by the player are mapped to time with that
//! bitrate and then to a segment plus a relative position inside it.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::playlist::{self, Playlist, SegmentInfo};
use crate::segment::{MutableSegment, Segment};
use crate::transport::Transport;

/// Default byte reservation per segment when a delegate sizes the cache.
pub const DEFAULT_BYTES_PER_SEGMENT: u64 = 3 * 1024 * 1024;

/// Number of leading segments whose sizes feed the VOD bitrate estimate.
const BOOTSTRAP_SEGMENTS: usize = 3;

/// Host-side knowledge the cache needs for sizing and seeking.
///
/// Without a delegate the stream cannot be seeked and the cache falls back to
/// [`SegmentCacheConfig::resident_byte_budget`].
pub trait SegmentCacheDelegate: Send + Sync {
    /// How many segments the cache may keep resident.
    fn segments_amount_to_cache(&self) -> usize;

    /// Total stream duration in seconds.
    fn duration(&self) -> f64;

    /// Playlist URL that starts a live stream at `time_offset` seconds.
    fn url_for_timeshift(&self, time_offset: f64) -> String;
}

/// Sizing of the resident segment set.
#[derive(Debug, Clone)]
pub struct SegmentCacheConfig {
    /// Byte budget used when no delegate is attached.
    pub resident_byte_budget: u64,
    /// Bytes reserved per segment when the delegate provides a segment count.
    pub bytes_per_segment: u64,
}

impl Default for SegmentCacheConfig {
    fn default() -> Self {
        Self {
            resident_byte_budget: 3 * DEFAULT_BYTES_PER_SEGMENT,
            bytes_per_segment: DEFAULT_BYTES_PER_SEGMENT,
        }
    }
}

/// A unit of fetch work handed to the downloader.
///
/// The generation ties the request to the playlist it was issued for; data
/// completed against an older generation (a live stream re-pointed meanwhile)
/// is discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct FillRequest {
    pub info: SegmentInfo,
    pub generation: u64,
}

impl FillRequest {
    /// Playlist index of the requested segment.
    pub fn index(&self) -> u64 {
        self.info.index
    }

    /// URL to download.
    pub fn url(&self) -> &str {
        &self.info.url
    }
}

/// A live playlist re-fetch, run without holding the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistReload {
    pub url: String,
    pub generation: u64,
}

/// Leading VOD segments whose sizes seed the bitrate estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetSample {
    pub segments: Vec<SegmentInfo>,
    pub generation: u64,
}

/// Live timeshift playlist a seek has to switch to.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeshiftTarget {
    pub url: String,
    pub time_offset: f64,
    pub generation: u64,
}

/// How a seek position maps onto the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SeekPlan {
    /// No segment covers the position, or the stream can't be seeked.
    Rejected,
    /// Playback now starts inside a VOD segment.
    Moved,
    /// The playlist at the target has to be loaded, then handed to
    /// [`SegmentCache::repoint`].
    Timeshift(TimeshiftTarget),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bootstrap {
    Pending,
    Done,
    Failed,
}

/// Resident segments and playback cursor for one HLS stream.
pub struct SegmentCache {
    playlist: Playlist,
    delegate: Option<Arc<dyn SegmentCacheDelegate>>,
    segments: BTreeMap<u64, MutableSegment>,
    load_queue: VecDeque<SegmentInfo>,
    current_index: u64,
    position_factor: f64,
    resident_bytes: u64,
    budget: u64,
    bitrate: f64,
    total_length: u64,
    playlist_time_offset: f64,
    bootstrap: Bootstrap,
    generation: u64,
    downloaded_bytes: u64,
    downloaded_seconds: f64,
}

impl SegmentCache {
    /// Load the playlist at `url` and queue its segments.
    ///
    /// For VOD streams this also stats the first segments to derive the
    /// bitrate and the time offset of every slot.
    pub async fn new(
        url: &str,
        delegate: Option<Arc<dyn SegmentCacheDelegate>>,
        transport: &dyn Transport,
        config: SegmentCacheConfig,
    ) -> Result<Self> {
        let playlist = Playlist::load(transport, url).await?;
        let mut cache = Self::with_playlist(playlist, delegate, config);
        cache.reload_playlist(transport).await?;
        cache.current_index = cache
            .load_queue
            .front()
            .map(|info| info.index)
            .unwrap_or_else(|| cache.playlist.cursor());
        info!(
            url = %cache.playlist.url(),
            is_vod = cache.playlist.is_vod(),
            queued = cache.load_queue.len(),
            budget = cache.budget,
            "Segment cache ready"
        );
        Ok(cache)
    }

    /// Wrap an already parsed playlist. Nothing is queued until
    /// [`reload_playlist`](Self::reload_playlist) runs.
    pub fn with_playlist(
        playlist: Playlist,
        delegate: Option<Arc<dyn SegmentCacheDelegate>>,
        config: SegmentCacheConfig,
    ) -> Self {
        let budget = match &delegate {
            Some(delegate) => {
                delegate.segments_amount_to_cache().max(1) as u64 * config.bytes_per_segment
            }
            None => config.resident_byte_budget,
        };
        let current_index = playlist.cursor();
        Self {
            playlist,
            delegate,
            segments: BTreeMap::new(),
            load_queue: VecDeque::new(),
            current_index,
            position_factor: 0.0,
            resident_bytes: 0,
            budget,
            bitrate: 0.0,
            total_length: 0,
            playlist_time_offset: 0.0,
            bootstrap: Bootstrap::Pending,
            generation: 0,
            downloaded_bytes: 0,
            downloaded_seconds: 0.0,
        }
    }

    /// Move every segment the playlist can offer into the load queue.
    ///
    /// A live playlist is re-fetched once its known entries are exhausted. The
    /// first time a VOD playlist has queued segments, the bitrate bootstrap runs.
    pub async fn reload_playlist(&mut self, transport: &dyn Transport) -> Result<()> {
        if self.queue_known_segments() == 0 && !self.playlist.is_vod() {
            let reload = self.playlist_reload();
            let data = playlist::fetch_text(transport, &reload.url).await?;
            self.apply_playlist_update(&reload, &data)?;
        }

        if let Some(sample) = self.offset_sample() {
            let sizes = Self::stat_sample(transport, &sample).await;
            self.apply_offset_sample(&sample, sizes);
        }
        Ok(())
    }

    /// Queue the playlist entries from its cursor on, without any fetch.
    /// Returns how many descriptors were added.
    pub fn queue_known_segments(&mut self) -> usize {
        let before = self.load_queue.len();
        while let Some((info, _)) = self.playlist.take_next() {
            self.load_queue.push_back(info);
        }
        let queued = self.load_queue.len() - before;
        if queued > 0 {
            debug!(queued, total = self.load_queue.len(), "Queued segments");
        }
        queued
    }

    /// Live re-fetch the worker should run: `None` for VOD, a full cache or
    /// while descriptors are still queued.
    pub fn reload_target(&self) -> Option<PlaylistReload> {
        if self.playlist.is_vod() || self.is_full() || !self.load_queue.is_empty() {
            return None;
        }
        Some(self.playlist_reload())
    }

    fn playlist_reload(&self) -> PlaylistReload {
        PlaylistReload {
            url: self.playlist.url().to_string(),
            generation: self.generation,
        }
    }

    /// Merge re-fetched playlist text and queue the entries it added.
    ///
    /// Text fetched for a previous generation is dropped and counts as nothing
    /// new.
    pub fn apply_playlist_update(&mut self, reload: &PlaylistReload, data: &str) -> Result<usize> {
        if reload.generation != self.generation {
            debug!(url = %reload.url, "Dropping playlist fetched before a re-point");
            return Ok(0);
        }
        if let Err(e) = self.playlist.parse(data) {
            error!(url = %reload.url, error = %e, "Bad M3U playlist on reload");
            return Err(e);
        }
        Ok(self.queue_known_segments())
    }

    /// Segments to stat while the VOD bitrate estimate is still pending.
    pub fn offset_sample(&self) -> Option<OffsetSample> {
        if !self.playlist.is_vod()
            || self.bootstrap != Bootstrap::Pending
            || self.load_queue.is_empty()
        {
            return None;
        }
        Some(OffsetSample {
            segments: self
                .load_queue
                .iter()
                .take(BOOTSTRAP_SEGMENTS)
                .cloned()
                .collect(),
            generation: self.generation,
        })
    }

    /// Stat every sampled segment; `None` as soon as one fails.
    pub async fn stat_sample(transport: &dyn Transport, sample: &OffsetSample) -> Option<Vec<u64>> {
        let mut sizes = Vec::with_capacity(sample.segments.len());
        for info in &sample.segments {
            match transport.stat(&info.url).await {
                Ok(size) => sizes.push(size),
                Err(e) => {
                    error!(url = %info.url, error = %e, "Failed to stat VOD segment");
                    return None;
                }
            }
        }
        Some(sizes)
    }

    /// Derive the bitrate from sampled sizes and give every VOD slot a time
    /// offset and a byte length. `None` sizes disable seeking for the stream.
    pub fn apply_offset_sample(&mut self, sample: &OffsetSample, sizes: Option<Vec<u64>>) {
        if sample.generation != self.generation || self.bootstrap != Bootstrap::Pending {
            return;
        }
        let Some(sizes) = sizes else {
            warn!("VOD offsets unavailable, seeking is disabled for this stream");
            self.bootstrap = Bootstrap::Failed;
            return;
        };
        let Some(first) = sample.segments.first().map(|info| info.index) else {
            return;
        };

        let mut time_offset = 0.0;
        let mut total = 0u64;
        for (info, size) in sample.segments.iter().zip(&sizes) {
            self.insert_offset_slot(info.clone(), time_offset, *size);
            time_offset += info.duration;
            total += size;
        }

        let bitrate = if time_offset > 0.0 {
            total as f64 / time_offset
        } else {
            0.0
        };

        let rest: Vec<SegmentInfo> = self
            .playlist
            .segments()
            .filter(|info| info.index >= first + sample.segments.len() as u64)
            .collect();
        for info in rest {
            let estimated = (bitrate * info.duration).round() as u64;
            let duration = info.duration;
            self.insert_offset_slot(info, time_offset, estimated);
            time_offset += duration;
            total += estimated;
        }

        self.bitrate = bitrate;
        self.total_length = total;
        self.bootstrap = Bootstrap::Done;

        // The tail is fetched right after the head so a seek to the end is served quickly.
        if self.load_queue.len() > 2 {
            if let Some(last) = self.load_queue.pop_back() {
                self.load_queue.insert(1, last);
            }
        }

        info!(
            bitrate,
            total_length = total,
            duration = time_offset,
            "VOD stream offsets initialized"
        );
    }

    /// Slots the fetcher already created keep their data and offsets.
    fn insert_offset_slot(&mut self, info: SegmentInfo, time_offset: f64, length: u64) {
        let index = info.index;
        self.segments.entry(index).or_insert_with(|| {
            let mut slot = MutableSegment::new(info, time_offset);
            slot.set_length(length);
            slot
        });
    }

    /// Next slot the fetcher should fill, or `None` when the cache is full or
    /// nothing is queued.
    ///
    /// Descriptors whose slot already holds data are skipped. VOD slots created
    /// by the bitrate bootstrap are reused; otherwise a fresh slot starts where
    /// the previous index ends, or at the playlist time offset.
    pub fn segment_to_fill(&mut self) -> Option<&mut MutableSegment> {
        if self.is_full() {
            return None;
        }

        let info = loop {
            let info = self.load_queue.pop_front()?;
            let has_data = self
                .segments
                .get(&info.index)
                .is_some_and(MutableSegment::is_valid);
            if !has_data {
                break info;
            }
        };
        let index = info.index;

        if self.playlist.is_vod() && self.segments.contains_key(&index) {
            debug!(index, "Start loading segment");
            return self.segments.get_mut(&index);
        }

        let time_offset = index
            .checked_sub(1)
            .and_then(|previous| self.segments.get(&previous))
            .map(|previous| previous.time_offset() + previous.duration())
            .unwrap_or(self.playlist_time_offset);
        debug!(index, time_offset, "Start loading segment");
        self.segments
            .insert(index, MutableSegment::new(info, time_offset));
        self.segments.get_mut(&index)
    }

    /// Mark the slot at `index` complete and account its bytes.
    pub fn segment_ready(&mut self, index: u64) {
        let Some(segment) = self.segments.get_mut(&index) else {
            warn!(index, "Ready notification for unknown segment");
            return;
        };
        if segment.is_valid() {
            return;
        }

        let previous_length = segment.length();
        segment.data_ready();
        let size = segment.size() as u64;
        let duration = segment.duration();

        self.resident_bytes += size;
        self.downloaded_bytes += size;
        self.downloaded_seconds += duration;
        if self.playlist.is_vod() && self.bootstrap == Bootstrap::Done {
            self.total_length = self.total_length - previous_length.min(self.total_length) + size;
        }
        debug!(index, size, resident_bytes = self.resident_bytes, "Segment added");
    }

    /// Take the next fetch job, if any.
    pub fn fill_request(&mut self) -> Option<FillRequest> {
        let generation = self.generation;
        self.segment_to_fill().map(|segment| FillRequest {
            info: segment.info().clone(),
            generation,
        })
    }

    /// Store downloaded bytes for `request` and publish the segment.
    ///
    /// Returns `Ok(false)` when the request is stale or its slot is gone or
    /// already filled.
    pub fn complete_fill(&mut self, request: &FillRequest, data: &[u8]) -> Result<bool> {
        if request.generation != self.generation {
            debug!(index = request.index(), "Dropping data for a previous playlist");
            return Ok(false);
        }
        let Some(segment) = self.segments.get_mut(&request.index()) else {
            debug!(index = request.index(), "Segment slot removed while loading");
            return Ok(false);
        };
        if segment.is_valid() {
            return Ok(false);
        }
        if let Err(e) = segment.push(data) {
            segment.free();
            return Err(e);
        }
        self.segment_ready(request.index());
        Ok(true)
    }

    /// Give a failed fetch back; the descriptor is retried before anything else.
    pub fn abandon_fill(&mut self, request: &FillRequest) {
        if request.generation != self.generation {
            return;
        }
        if let Some(segment) = self.segments.get_mut(&request.index()) {
            if !segment.is_valid() && segment.size() > 0 {
                segment.free();
            }
        }
        warn!(
            index = request.index(),
            url = %request.url(),
            "Segment fetch failed, queued for retry"
        );
        self.load_queue.push_front(request.info.clone());
    }

    /// Segment at the playback cursor, positioned for reading.
    ///
    /// `None` means the segment is not downloaded yet. On success the cursor
    /// moves to the following index and the position factor resets. Every call
    /// may evict one resident segment.
    pub fn next_segment(&mut self) -> Option<&mut Segment> {
        if self.segments.is_empty() {
            return None;
        }

        let current = self.current_index;
        let ready = match self.segments.get_mut(&current) {
            Some(segment) if segment.is_valid() => {
                let position = (self.position_factor * segment.size() as f64) as usize;
                segment.segment_mut().seek(position);
                debug!(index = current, position, "Reading from segment");
                true
            }
            Some(_) => {
                debug!(index = current, "Segment has no data yet");
                false
            }
            None => {
                debug!(index = current, resident = self.segments.len(), "No slot for segment");
                false
            }
        };

        if self.is_full() || !self.can_seek() {
            let freed = self.evict_one(true);
            if freed.is_none() && !ready && self.is_full() {
                // Only the newest slot is left to give up for the one playback waits on.
                self.evict_one(false);
            }
        }

        if !ready {
            return None;
        }
        self.current_index += 1;
        self.position_factor = 0.0;
        self.segments.get_mut(&current).map(MutableSegment::segment_mut)
    }

    /// Free one resident segment.
    ///
    /// Played segments (below the cursor) go first. Only under budget pressure
    /// is a prefetched segment ahead of the cursor taken, the newest one
    /// excluded when `keep_newest` is set, and its descriptor queued again.
    fn evict_one(&mut self, keep_newest: bool) -> Option<u64> {
        let current = self.current_index;
        let behind = self
            .segments
            .range(..current)
            .find(|(_, segment)| segment.is_valid())
            .map(|(index, _)| *index);

        let victim = match behind {
            Some(index) => index,
            None if self.is_full() => self
                .segments
                .iter()
                .rev()
                .skip(usize::from(keep_newest))
                .take_while(|(index, _)| **index > current)
                .find(|(_, segment)| segment.is_valid())
                .map(|(index, _)| *index)?,
            None => return None,
        };

        let seekable = self.can_seek();
        let segment = self.segments.get_mut(&victim)?;
        let info = segment.info().clone();
        self.resident_bytes -= (segment.size() as u64).min(self.resident_bytes);
        if seekable {
            segment.free();
        } else {
            self.segments.remove(&victim);
        }

        if victim > current && !self.load_queue.iter().any(|queued| queued.index == victim) {
            let at = self
                .load_queue
                .iter()
                .position(|queued| queued.index > victim)
                .unwrap_or(self.load_queue.len());
            self.load_queue.insert(at, info);
        }

        debug!(index = victim, resident_bytes = self.resident_bytes, "Segment removed");
        Some(victim)
    }

    /// Move playback to byte `position` of the logical stream.
    ///
    /// VOD streams locate the segment covering the mapped time and set the
    /// relative position inside it. Live streams are re-pointed to the
    /// delegate's timeshift URL, which drops every resident segment. Returns
    /// `Ok(false)` when the stream cannot be seeked or nothing covers the time.
    pub async fn prepare_segment_for_position(
        &mut self,
        position: u64,
        transport: &dyn Transport,
    ) -> Result<bool> {
        let target = match self.plan_seek(position) {
            SeekPlan::Rejected => return Ok(false),
            SeekPlan::Moved => return Ok(true),
            SeekPlan::Timeshift(target) => target,
        };

        let playlist = Playlist::load(transport, &target.url).await?;
        if !self.repoint(&target, playlist) {
            return Ok(false);
        }
        self.reload_playlist(transport).await?;
        if let Some(first) = self.load_queue.front() {
            self.current_index = first.index;
        }
        Ok(true)
    }

    /// Map byte `position` to a segment without touching the network.
    ///
    /// A VOD seek is applied right away: the cursor moves to the covering
    /// segment and the load queue is rebuilt from there, so the target is
    /// fetched even after every earlier descriptor was consumed. A live seek
    /// only yields the timeshift playlist to load.
    pub fn plan_seek(&mut self, position: u64) -> SeekPlan {
        let Some(delegate) = self.delegate.clone() else {
            debug!(position, "Seek requested on a stream without delegate");
            return SeekPlan::Rejected;
        };

        let time_offset = self.time_offset_from_position(position, delegate.as_ref());

        if !self.playlist.is_vod() {
            return SeekPlan::Timeshift(TimeshiftTarget {
                url: delegate.url_for_timeshift(time_offset),
                time_offset,
                generation: self.generation,
            });
        }

        if self.bootstrap != Bootstrap::Done {
            debug!(position, "VOD offsets unavailable, position can't be seeked");
            return SeekPlan::Rejected;
        }
        let found = self
            .segments
            .iter()
            .find(|(_, segment)| {
                segment.time_offset() <= time_offset
                    && time_offset < segment.time_offset() + segment.duration()
            })
            .map(|(index, segment)| {
                (*index, (time_offset - segment.time_offset()) / segment.duration())
            });
        let Some((index, factor)) = found else {
            debug!(
                position,
                time_offset,
                duration = delegate.duration(),
                "Position can't be seeked"
            );
            return SeekPlan::Rejected;
        };

        self.current_index = index;
        self.position_factor = factor;
        self.playlist_time_offset = time_offset;
        self.load_queue.clear();
        self.playlist.set_next_segment_index(index);
        self.queue_known_segments();
        debug!(position, time_offset, index, factor, "Seek to VOD segment");
        SeekPlan::Moved
    }

    /// Switch a live stream to the timeshift `playlist` loaded for `target`.
    ///
    /// Every resident slot is dropped and the generation bumped. Returns
    /// `false` when another re-point happened since the seek was planned.
    pub fn repoint(&mut self, target: &TimeshiftTarget, playlist: Playlist) -> bool {
        if target.generation != self.generation {
            debug!(url = %target.url, "Dropping outdated timeshift playlist");
            return false;
        }
        info!(url = %target.url, time_offset = target.time_offset, "Re-pointing live playlist");
        self.replace_playlist(playlist);
        self.playlist_time_offset = target.time_offset;
        self.queue_known_segments();
        self.current_index = self
            .load_queue
            .front()
            .map(|info| info.index)
            .unwrap_or_else(|| self.playlist.cursor());
        true
    }

    fn replace_playlist(&mut self, playlist: Playlist) {
        self.playlist = playlist;
        self.segments.clear();
        self.load_queue.clear();
        self.resident_bytes = 0;
        self.position_factor = 0.0;
        self.bitrate = 0.0;
        self.total_length = 0;
        self.bootstrap = Bootstrap::Pending;
        self.generation += 1;
    }

    fn time_offset_from_position(&self, position: u64, delegate: &dyn SegmentCacheDelegate) -> f64 {
        let rate = self.bitrate();
        if rate <= 0.0 {
            return 0.0;
        }
        (position as f64 / rate).clamp(0.0, delegate.duration().max(0.0))
    }

    /// Bytes per second: the VOD bootstrap estimate, else the average over
    /// everything downloaded so far.
    pub fn bitrate(&self) -> f64 {
        if self.bitrate > 0.0 {
            self.bitrate
        } else if self.downloaded_seconds > 0.0 {
            self.downloaded_bytes as f64 / self.downloaded_seconds
        } else {
            0.0
        }
    }

    /// Whether the resident bytes reached the budget.
    pub fn is_full(&self) -> bool {
        self.resident_bytes >= self.budget
    }

    /// Whether byte positions can be mapped to time.
    pub fn can_seek(&self) -> bool {
        self.delegate.is_some()
    }

    /// Whether playback moved past the last VOD segment.
    pub fn is_eof(&self) -> bool {
        self.playlist.is_vod()
            && self
                .playlist
                .last_index()
                .is_some_and(|last| self.current_index > last)
    }

    /// Bytes currently held by filled segments.
    pub fn resident_bytes(&self) -> u64 {
        self.resident_bytes
    }

    /// Resident byte budget.
    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Index the player reads next.
    pub fn current_index(&self) -> u64 {
        self.current_index
    }

    /// Relative start position inside the current segment, in `[0, 1)`.
    pub fn position_factor(&self) -> f64 {
        self.position_factor
    }

    /// Estimated VOD stream length, or the bytes downloaded so far for live.
    pub fn total_length(&self) -> u64 {
        if self.playlist.is_vod() && self.bootstrap == Bootstrap::Done {
            self.total_length
        } else {
            self.downloaded_bytes
        }
    }

    /// Start time of the current playlist within the logical stream.
    pub fn playlist_time_offset(&self) -> f64 {
        self.playlist_time_offset
    }

    /// Whether the playlist is VOD.
    pub fn is_vod(&self) -> bool {
        self.playlist.is_vod()
    }

    /// The underlying playlist.
    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    /// Slot at `index`, if any.
    pub fn segment(&self, index: u64) -> Option<&MutableSegment> {
        self.segments.get(&index)
    }

    /// Payload of the filled segment at `index`, for continuing a read that
    /// [`next_segment`](Self::next_segment) started.
    pub fn filled_segment_mut(&mut self, index: u64) -> Option<&mut Segment> {
        self.segments
            .get_mut(&index)
            .filter(|segment| segment.is_valid())
            .map(MutableSegment::segment_mut)
    }

    /// Indices waiting to be fetched, in fetch order.
    pub fn queued_indices(&self) -> Vec<u64> {
        self.load_queue.iter().map(|info| info.index).collect()
    }

    /// Whether nothing waits in the load queue.
    pub fn queue_is_empty(&self) -> bool {
        self.load_queue.is_empty()
    }

    /// Playlist generation; bumped on every live re-point.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl std::fmt::Debug for SegmentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentCache")
            .field("url", &self.playlist.url())
            .field("is_vod", &self.playlist.is_vod())
            .field("current_index", &self.current_index)
            .field("resident_bytes", &self.resident_bytes)
            .field("budget", &self.budget)
            .field("queued", &self.load_queue.len())
            .finish()
    }
}
