//! M3U8 playlist parsing.
//!
//! Tag grammar is handled by `m3u8-rs`. On top of it a small header check
//! decides where numbering starts and whether the list is VOD: a media
//! sequence tag wins over the playlist type, `#EXT-X-ALLOW-CACHE:YES` marks a
//! sequenced list as VOD, and a list with neither tag is rejected. Live
//! playlists are merged on reload so that only new trailing entries are added.

use std::collections::BTreeMap;

use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::transport::Transport;

const TAG_M3U: &str = "#EXTM3U";
const TAG_STREAM_INF: &str = "#EXT-X-STREAM-INF:";
const TAG_INF: &str = "#EXTINF:";
const TAG_SEQUENCE: &str = "#EXT-X-MEDIA-SEQUENCE:";
const TAG_TYPE: &str = "#EXT-X-PLAYLIST-TYPE:";
// Removed in protocol version 7, still sent by some providers.
const TAG_ALLOW_CACHE: &str = "#EXT-X-ALLOW-CACHE:";
const TAG_ENDLIST: &str = "#EXT-X-ENDLIST";
const ATTR_BANDWIDTH: &str = "BANDWIDTH=";

/// Descriptor of one media segment to fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentInfo {
    /// Media sequence index.
    pub index: u64,
    /// Duration in seconds, as declared by `#EXTINF`.
    pub duration: f64,
    /// Absolute segment URL.
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
struct SegmentEntry {
    duration: f64,
    url: String,
}

/// Parsed media playlist with a load cursor.
#[derive(Debug, Clone)]
pub struct Playlist {
    url: String,
    is_vod: bool,
    cursor: u64,
    segments: BTreeMap<u64, SegmentEntry>,
}

impl Playlist {
    /// Create an empty playlist for the media playlist at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            is_vod: false,
            cursor: 0,
            segments: BTreeMap::new(),
        }
    }

    /// Build a playlist from media playlist text already in memory.
    pub fn from_media_text(url: impl Into<String>, data: &str) -> Result<Self> {
        let mut playlist = Self::new(url);
        playlist.parse(data)?;
        playlist.seed_cursor();
        Ok(playlist)
    }

    /// Fetch and parse the playlist at `url`.
    ///
    /// A master playlist is resolved to its highest-bandwidth variant, which
    /// is then fetched as the media playlist.
    pub async fn load(transport: &dyn Transport, url: &str) -> Result<Self> {
        let mut data = fetch_text(transport, url).await?;
        let mut media_url = url.to_string();

        if data.contains(TAG_STREAM_INF) {
            let (bandwidth, variant_url) = best_variant(&data)?;
            media_url = to_absolute_url(&variant_url, url)?;
            debug!(bandwidth, url = %media_url, "Selected variant playlist");
            data = fetch_text(transport, &media_url).await?;
        }

        let mut playlist = Self::new(media_url);
        if let Err(e) = playlist.parse(&data) {
            error!(url = %playlist.url, error = %e, "Bad M3U playlist");
            return Err(e);
        }
        playlist.seed_cursor();
        Ok(playlist)
    }

    /// Re-fetch the media playlist and merge new entries.
    ///
    /// Returns whether the fetched text contained any segment entry.
    pub async fn reload(&mut self, transport: &dyn Transport) -> Result<bool> {
        let data = fetch_text(transport, &self.url).await?;
        self.parse(&data).inspect_err(|e| {
            error!(url = %self.url, error = %e, "Bad M3U playlist on reload");
        })
    }

    /// Parse media playlist text and merge its entries.
    ///
    /// Indices already known are skipped without touching the stored entry.
    /// Returns whether the text contained any segment entry.
    pub fn parse(&mut self, data: &str) -> Result<bool> {
        let header = MediaHeader::scan(data)?;
        let media = m3u8_rs::parse_media_playlist_res(header.body.as_bytes())
            .map_err(|e| malformed("media", e))?;
        self.is_vod = header.is_vod;

        let mut index = header.first_index;
        for segment in &media.segments {
            if !self.segments.contains_key(&index) {
                let url = to_absolute_url(&segment.uri, &self.url)?;
                let duration = widen(segment.duration);
                self.segments.insert(index, SegmentEntry { duration, url });
            }
            index += 1;
        }

        let has_content = !media.segments.is_empty();
        debug!(
            segments = self.segments.len(),
            has_content,
            is_vod = self.is_vod,
            "Parsed media playlist"
        );
        Ok(has_content)
    }

    /// Next segment at the load cursor, advancing it.
    ///
    /// Once the known entries are exhausted a live playlist is reloaded; a VOD
    /// playlist has nothing more to offer. `None` means "nothing available",
    /// either end of a VOD stream or a live reload without new entries. The
    /// flag tells whether the entry after the returned one is already known.
    pub async fn next_segment(
        &mut self,
        transport: &dyn Transport,
    ) -> Result<Option<(SegmentInfo, bool)>> {
        if let Some(next) = self.take_next() {
            return Ok(Some(next));
        }
        if self.is_vod {
            return Ok(None);
        }
        if !self.reload(transport).await? {
            return Ok(None);
        }
        Ok(self.take_next())
    }

    /// Next known segment at the cursor without any reload.
    pub fn take_next(&mut self) -> Option<(SegmentInfo, bool)> {
        let entry = self.segments.get(&self.cursor)?;
        let info = SegmentInfo {
            index: self.cursor,
            duration: entry.duration,
            url: entry.url.clone(),
        };
        self.cursor += 1;
        let has_more = self.segments.contains_key(&self.cursor);
        Some((info, has_more))
    }

    /// Move the load cursor to `index`.
    pub fn set_next_segment_index(&mut self, index: u64) {
        self.cursor = index;
    }

    /// URL of the media playlist (base for relative segment URLs).
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the playlist describes a VOD stream.
    pub fn is_vod(&self) -> bool {
        self.is_vod
    }

    /// Current load cursor.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Number of known segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether no segment is known.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Highest known segment index.
    pub fn last_index(&self) -> Option<u64> {
        self.segments.keys().next_back().copied()
    }

    /// All known segments in index order.
    pub fn segments(&self) -> impl Iterator<Item = SegmentInfo> + '_ {
        self.segments.iter().map(|(index, entry)| SegmentInfo {
            index: *index,
            duration: entry.duration,
            url: entry.url.clone(),
        })
    }

    fn seed_cursor(&mut self) {
        if let Some(first) = self.segments.keys().next() {
            self.cursor = *first;
        }
    }
}

/// Resolve `url` against the playlist URL `base`.
///
/// Absolute URLs are returned as is. Relative ones replace everything after
/// the last `/` of the base path; root-relative ones keep the base origin.
pub fn to_absolute_url(url: &str, base: &str) -> Result<String> {
    if url.contains("://") {
        return Ok(url.to_string());
    }

    let scheme_end = base
        .find("://")
        .map(|pos| pos + 3)
        .ok_or_else(|| Error::format(format!("missing scheme in base URL: {base}")))?;
    let path_part = base.split(['?', '#']).next().unwrap_or(base);
    let after_scheme = path_part.get(scheme_end..).unwrap_or("");

    if let Some(absolute_path) = url.strip_prefix('/') {
        let host_end = after_scheme.find('/').unwrap_or(after_scheme.len());
        return Ok(format!(
            "{}/{}",
            &path_part[..scheme_end + host_end],
            absolute_path
        ));
    }

    let slash = after_scheme
        .rfind('/')
        .ok_or_else(|| Error::format(format!("no '/' in base URL: {base}")))?;
    Ok(format!("{}{}", &path_part[..=scheme_end + slash], url))
}

/// Tag facts read before the text goes to the M3U8 parser.
struct MediaHeader<'a> {
    first_index: u64,
    is_vod: bool,
    /// Text from `#EXTM3U` on, cut at `#EXT-X-ENDLIST` for unsequenced VOD.
    body: &'a str,
}

impl<'a> MediaHeader<'a> {
    fn scan(data: &'a str) -> Result<Self> {
        let start = data
            .find(TAG_M3U)
            .ok_or_else(|| Error::format("missing #EXTM3U tag"))?;
        let body = &data[start..];
        let header = Self::from_tags(body)?;
        if has_unterminated_entry(header.body) {
            return Err(Error::format("#EXTINF entry is not followed by a URL"));
        }
        Ok(header)
    }

    fn from_tags(body: &'a str) -> Result<Self> {
        if let Some(sequence) = tag_value(body, TAG_SEQUENCE) {
            let first_index = sequence.parse::<u64>().map_err(|_| {
                Error::format(format!("bad #EXT-X-MEDIA-SEQUENCE value '{sequence}'"))
            })?;
            let is_vod = tag_value(body, TAG_ALLOW_CACHE).is_some_and(|v| v.starts_with("YES"));
            return Ok(Self {
                first_index,
                is_vod,
                body,
            });
        }

        // VOD lists may omit the sequence number.
        let kind = tag_value(body, TAG_TYPE).ok_or_else(|| {
            Error::format("missing #EXT-X-MEDIA-SEQUENCE and #EXT-X-PLAYLIST-TYPE tag")
        })?;
        if !kind.starts_with("VOD") {
            return Err(Error::format(format!("VOD playlist expected, got '{kind}'")));
        }
        let end = body.find(TAG_ENDLIST).unwrap_or(body.len());
        Ok(Self {
            first_index: 0,
            is_vod: true,
            body: &body[..end],
        })
    }
}

/// Whether the last `#EXTINF` tag has no URI line after it.
fn has_unterminated_entry(body: &str) -> bool {
    let mut uri_seen = false;
    for line in body.lines().rev().map(str::trim) {
        if line.starts_with(TAG_INF) {
            return !uri_seen;
        }
        if !line.is_empty() && !line.starts_with('#') {
            uri_seen = true;
        }
    }
    false
}

fn tag_value<'a>(data: &'a str, tag: &str) -> Option<&'a str> {
    data.lines()
        .find_map(|line| line.trim().strip_prefix(tag))
        .map(str::trim)
}

/// Pick the variant with the highest declared bandwidth; the first one wins
/// a tie. I-frame only variants are never picked.
fn best_variant(data: &str) -> Result<(u64, String)> {
    let missing_bandwidth = data
        .lines()
        .filter_map(|line| line.trim().strip_prefix(TAG_STREAM_INF))
        .any(|attributes| {
            !attributes
                .split(',')
                .any(|attribute| attribute.trim().starts_with(ATTR_BANDWIDTH))
        });
    if missing_bandwidth {
        return Err(Error::format("missing BANDWIDTH in #EXT-X-STREAM-INF tag"));
    }

    let start = data.find(TAG_M3U).unwrap_or(0);
    let master = m3u8_rs::parse_master_playlist_res(data[start..].as_bytes())
        .map_err(|e| malformed("master", e))?;

    master
        .variants
        .into_iter()
        .filter(|variant| !variant.is_i_frame)
        .reduce(|best, variant| {
            if variant.bandwidth > best.bandwidth {
                variant
            } else {
                best
            }
        })
        .map(|variant| (variant.bandwidth, variant.uri))
        .ok_or_else(|| Error::format("no variant stream found"))
}

/// `#EXTINF` durations are parsed as `f32`; going through the shortest
/// decimal form keeps `2.6` as `2.6` once widened.
fn widen(duration: f32) -> f64 {
    duration
        .to_string()
        .parse()
        .unwrap_or_else(|_| f64::from(duration))
}

fn malformed(kind: &str, e: impl std::fmt::Display) -> Error {
    let detail: String = e.to_string().chars().take(120).collect();
    Error::format(format!("malformed {kind} playlist: {detail}"))
}

/// Fetch playlist text, decoding invalid UTF-8 lossily.
pub async fn fetch_text(transport: &dyn Transport, url: &str) -> Result<String> {
    debug!(url, "(Re)loading playlist");
    let body = transport.fetch(url).await?;
    Ok(String::from_utf8_lossy(&body).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    const BASE: &str = "http://example.com/live/index.m3u8";

    fn live_playlist(sequence: u64, names: &[&str]) -> String {
        let mut out =
            format!("#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:{sequence}\n");
        for name in names {
            out.push_str(&format!("#EXTINF:6.0,\n{name}\n"));
        }
        out
    }

    #[test]
    fn test_parse_vod_playlist() {
        let data = "#EXTM3U\n#EXT-X-PLAYLIST-TYPE:VOD\n\
            #EXTINF:2.0,\nseg0.ts\n#EXTINF:2.0,\nseg1.ts\n#EXT-X-ENDLIST";
        let playlist = Playlist::from_media_text(BASE, data).unwrap();

        assert!(playlist.is_vod());
        let segments: Vec<_> = playlist.segments().collect();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].index, 0);
        assert_eq!(segments[1].index, 1);
        assert_eq!(segments[0].duration, 2.0);
        assert_eq!(segments[1].url, "http://example.com/live/seg1.ts");
    }

    #[test]
    fn test_vod_entries_after_endlist_are_ignored() {
        let data = "#EXTM3U\n#EXT-X-PLAYLIST-TYPE:VOD\n\
            #EXTINF:2.0,\na.ts\n#EXT-X-ENDLIST\n#EXTINF:2.0,\nb.ts\n";
        let playlist = Playlist::from_media_text(BASE, data).unwrap();
        assert_eq!(playlist.len(), 1);
    }

    #[test]
    fn test_parse_live_playlist_seeds_sequence() {
        let playlist =
            Playlist::from_media_text(BASE, &live_playlist(120, &["a.ts", "b.ts"])).unwrap();

        assert!(!playlist.is_vod());
        assert_eq!(playlist.cursor(), 120);
        let indices: Vec<u64> = playlist.segments().map(|s| s.index).collect();
        assert_eq!(indices, vec![120, 121]);
    }

    #[test]
    fn test_allow_cache_marks_vod() {
        let data = "#EXTM3U\n#EXT-X-MEDIA-SEQUENCE:0\n#EXT-X-ALLOW-CACHE:YES\n#EXTINF:4,\na.ts\n";
        assert!(Playlist::from_media_text(BASE, data).unwrap().is_vod());

        let data = "#EXTM3U\n#EXT-X-MEDIA-SEQUENCE:0\n#EXT-X-ALLOW-CACHE:NO\n#EXTINF:4,\na.ts\n";
        assert!(!Playlist::from_media_text(BASE, data).unwrap().is_vod());
    }

    #[test]
    fn test_reload_merge_never_overwrites() {
        let mut playlist =
            Playlist::from_media_text(BASE, &live_playlist(10, &["a.ts", "b.ts", "c.ts"]))
                .unwrap();
        let has_content = playlist
            .parse(&live_playlist(11, &["b2.ts", "c2.ts", "d.ts"]))
            .unwrap();

        assert!(has_content);
        let segments: Vec<_> = playlist.segments().collect();
        let indices: Vec<u64> = segments.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![10, 11, 12, 13]);
        assert_eq!(segments[1].url, "http://example.com/live/b.ts");
        assert_eq!(segments[3].url, "http://example.com/live/d.ts");
    }

    #[test]
    fn test_tags_between_extinf_and_url_are_skipped() {
        let data = "#EXTM3U\n#EXT-X-MEDIA-SEQUENCE:1\n\
            #EXTINF:5.5,title\n#EXT-X-DISCONTINUITY\nseg.ts\n";
        let playlist = Playlist::from_media_text(BASE, data).unwrap();
        let segment = playlist.segments().next().unwrap();
        assert_eq!(segment.index, 1);
        assert_eq!(segment.duration, 5.5);
        assert_eq!(segment.url, "http://example.com/live/seg.ts");
    }

    #[test]
    fn test_fractional_durations_widen_exactly() {
        let data = "#EXTM3U\n#EXT-X-MEDIA-SEQUENCE:0\n#EXTINF:2.6,\na.ts\n#EXTINF:7.975,\nb.ts\n";
        let durations: Vec<f64> = Playlist::from_media_text(BASE, data)
            .unwrap()
            .segments()
            .map(|s| s.duration)
            .collect();
        assert_eq!(durations, vec![2.6, 7.975]);
    }

    #[test]
    fn test_sequence_tag_wins_over_playlist_type() {
        let data = "#EXTM3U\n#EXT-X-PLAYLIST-TYPE:EVENT\n\
            #EXT-X-MEDIA-SEQUENCE:40\n#EXTINF:4,\na.ts\n";
        let playlist = Playlist::from_media_text(BASE, data).unwrap();
        assert!(!playlist.is_vod());
        assert_eq!(playlist.cursor(), 40);
    }

    #[test]
    fn test_format_errors() {
        let cases = [
            "#EXT-X-PLAYLIST-TYPE:VOD\n#EXTINF:2,\na.ts\n",
            "#EXTM3U\n#EXTINF:2,\na.ts\n",
            "#EXTM3U\n#EXT-X-PLAYLIST-TYPE:EVENT\n#EXTINF:2,\na.ts\n",
            "#EXTM3U\n#EXT-X-MEDIA-SEQUENCE:abc\n#EXTINF:2,\na.ts\n",
            "#EXTM3U\n#EXT-X-MEDIA-SEQUENCE:-1\n#EXTINF:2,\na.ts\n",
            "#EXTM3U\n#EXT-X-MEDIA-SEQUENCE:1\n#EXTINF:2,\na.ts\n#EXTINF:2,\n",
            "#EXTM3U\n#EXT-X-PLAYLIST-TYPE:VOD\n#EXTINF:2,\n#EXT-X-ENDLIST\nb.ts\n",
        ];
        for data in cases {
            let result = Playlist::from_media_text(BASE, data);
            assert!(
                matches!(result, Err(Error::Format(_))),
                "expected format error for {data:?}"
            );
        }
    }

    #[test]
    fn test_empty_live_playlist_has_no_content() {
        let mut playlist = Playlist::new(BASE);
        assert!(!playlist.parse("#EXTM3U\n#EXT-X-MEDIA-SEQUENCE:5\n").unwrap());
        assert!(playlist.is_empty());
    }

    #[test]
    fn test_to_absolute_url() {
        assert_eq!(
            to_absolute_url("http://cdn.example.com/a.ts", BASE).unwrap(),
            "http://cdn.example.com/a.ts"
        );
        assert_eq!(
            to_absolute_url("seg/a.ts", BASE).unwrap(),
            "http://example.com/live/seg/a.ts"
        );
        assert_eq!(
            to_absolute_url("/other/a.ts", BASE).unwrap(),
            "http://example.com/other/a.ts"
        );
        assert_eq!(
            to_absolute_url("a.ts", "https://example.com/live/index.m3u8?token=x/y").unwrap(),
            "https://example.com/live/a.ts"
        );
        assert!(matches!(
            to_absolute_url("a.ts", "example.com/live/index.m3u8"),
            Err(Error::Format(_))
        ));
        assert!(matches!(
            to_absolute_url("a.ts", "http://example.com"),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_best_variant_picks_highest_bandwidth() {
        let data = "#EXTM3U\n\
            #EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360\nlow/index.m3u8\n\
            #EXT-X-STREAM-INF:AVERAGE-BANDWIDTH=1000,BANDWIDTH=2500000,\
            CODECS=\"avc1.4d401f,mp4a.40.2\"\nhigh/index.m3u8\n\
            #EXT-X-STREAM-INF:BANDWIDTH=1200000\nmid/index.m3u8\n";
        let (rate, url) = best_variant(data).unwrap();
        assert_eq!(rate, 2_500_000);
        assert_eq!(url, "high/index.m3u8");
    }

    #[test]
    fn test_variant_without_bandwidth_is_rejected() {
        let data =
            "#EXTM3U\n#EXT-X-STREAM-INF:AVERAGE-BANDWIDTH=900,RESOLUTION=640x360\nlow.m3u8\n";
        assert!(matches!(best_variant(data), Err(Error::Format(_))));
    }

    #[test]
    fn test_iframe_only_master_is_rejected() {
        let data = "#EXTM3U\n#EXT-X-I-FRAME-STREAM-INF:BANDWIDTH=86000,URI=\"iframe.m3u8\"\n";
        assert!(matches!(best_variant(data), Err(Error::Format(_))));
    }

    #[tokio::test]
    async fn test_load_resolves_master_playlist() {
        let transport = MemoryTransport::new();
        transport.insert(
            "http://example.com/master.m3u8",
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=100\nlow.m3u8\n\
             #EXT-X-STREAM-INF:BANDWIDTH=900\nhigh.m3u8\n",
        );
        transport.insert(
            "http://example.com/high.m3u8",
            live_playlist(7, &["h0.ts", "h1.ts"]),
        );

        let playlist = Playlist::load(&transport, "http://example.com/master.m3u8")
            .await
            .unwrap();

        assert_eq!(playlist.url(), "http://example.com/high.m3u8");
        assert_eq!(playlist.cursor(), 7);
        assert_eq!(
            playlist.segments().next().unwrap().url,
            "http://example.com/h0.ts"
        );
    }

    #[tokio::test]
    async fn test_next_segment_reloads_live_playlist() {
        let transport = MemoryTransport::new();
        transport.insert(BASE, live_playlist(1, &["a.ts", "b.ts"]));
        let mut playlist = Playlist::load(&transport, BASE).await.unwrap();

        let (first, has_more) = playlist.next_segment(&transport).await.unwrap().unwrap();
        assert_eq!(first.index, 1);
        assert!(has_more);
        let (second, has_more) = playlist.next_segment(&transport).await.unwrap().unwrap();
        assert_eq!(second.index, 2);
        assert!(!has_more);

        // Nothing new on the server yet.
        assert!(playlist.next_segment(&transport).await.unwrap().is_none());

        transport.insert(BASE, live_playlist(2, &["b.ts", "c.ts"]));
        let (third, _) = playlist.next_segment(&transport).await.unwrap().unwrap();
        assert_eq!(third.index, 3);
        assert_eq!(third.url, "http://example.com/live/c.ts");
    }

    #[tokio::test]
    async fn test_next_segment_on_exhausted_vod_does_not_reload() {
        let transport = MemoryTransport::new();
        transport.insert(
            BASE,
            "#EXTM3U\n#EXT-X-PLAYLIST-TYPE:VOD\n#EXTINF:2.0,\nseg0.ts\n#EXT-X-ENDLIST\n",
        );
        let mut playlist = Playlist::load(&transport, BASE).await.unwrap();

        assert!(playlist.next_segment(&transport).await.unwrap().is_some());
        assert!(playlist.next_segment(&transport).await.unwrap().is_none());
        assert_eq!(transport.fetch_count(BASE), 1);
    }
}
