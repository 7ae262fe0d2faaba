//! In-memory media segment buffers.

use tracing::debug;

use crate::error::{Error, Result};
use crate::playlist::SegmentInfo;

/// Payload of one media segment with a read cursor.
///
/// Data only ever grows at the end; the cursor can be moved anywhere inside
/// what has been buffered so far.
#[derive(Debug, Default)]
pub struct Segment {
    duration: f64,
    data: Vec<u8>,
    cursor: usize,
}

impl Segment {
    /// Create an empty segment of the given duration in seconds.
    pub fn new(duration: f64) -> Self {
        Self {
            duration,
            data: Vec::new(),
            cursor: 0,
        }
    }

    /// Copy up to `buf.len()` bytes from the cursor into `buf`.
    ///
    /// Returns 0 at the end of buffered data, which is not necessarily the
    /// end of the segment.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let actual = buf.len().min(self.bytes_ready());
        buf[..actual].copy_from_slice(&self.data[self.cursor..self.cursor + actual]);
        self.cursor += actual;
        actual
    }

    /// Move the cursor, clamped to `[0, size]`. Returns the new position.
    pub fn seek(&mut self, position: usize) -> usize {
        self.cursor = position.min(self.data.len());
        self.cursor
    }

    /// Cursor position.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Number of buffered bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Bytes left between the cursor and the end of buffered data.
    pub fn bytes_ready(&self) -> usize {
        self.data.len() - self.cursor
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    fn push(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.data
            .try_reserve(bytes.len())
            .map_err(|_| Error::Allocation {
                requested: self.data.len() + bytes.len(),
            })?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    fn release(&mut self) {
        self.data = Vec::new();
        self.cursor = 0;
    }
}

/// A segment slot owned by the segment cache.
///
/// Besides the payload it carries the playlist descriptor, its start time in
/// the logical stream and its byte length (exact once filled, estimated from
/// the bootstrap bitrate before that).
#[derive(Debug)]
pub struct MutableSegment {
    segment: Segment,
    info: SegmentInfo,
    time_offset: f64,
    length: u64,
    is_valid: bool,
}

impl MutableSegment {
    /// Create an empty slot for `info` starting at `time_offset` seconds.
    pub fn new(info: SegmentInfo, time_offset: f64) -> Self {
        Self {
            segment: Segment::new(info.duration),
            info,
            time_offset,
            length: 0,
            is_valid: false,
        }
    }

    /// Append fetched bytes.
    pub fn push(&mut self, bytes: &[u8]) -> Result<()> {
        self.segment.push(bytes)
    }

    /// Mark the payload complete and visible to the player.
    pub fn data_ready(&mut self) {
        self.is_valid = true;
        self.length = self.segment.size() as u64;
    }

    /// Release the payload but keep identity, duration and offsets.
    pub fn free(&mut self) {
        debug!(index = self.info.index, "Freeing segment payload");
        self.segment.release();
        self.is_valid = false;
    }

    /// Whether the slot holds complete data.
    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    /// Playlist descriptor.
    pub fn info(&self) -> &SegmentInfo {
        &self.info
    }

    /// Start time in seconds within the logical stream.
    pub fn time_offset(&self) -> f64 {
        self.time_offset
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.info.duration
    }

    /// Exact or estimated byte length.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Set the exact or estimated byte length.
    pub fn set_length(&mut self, length: u64) {
        self.length = length;
    }

    /// Number of buffered bytes.
    pub fn size(&self) -> usize {
        self.segment.size()
    }

    /// The payload view.
    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// The payload view, for reading.
    pub fn segment_mut(&mut self) -> &mut Segment {
        &mut self.segment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(index: u64) -> SegmentInfo {
        SegmentInfo {
            index,
            duration: 6.0,
            url: format!("http://example.com/{index}.ts"),
        }
    }

    #[test]
    fn test_read_after_push() {
        let mut segment = MutableSegment::new(info(0), 0.0);
        segment.push(b"hello ").unwrap();
        segment.push(b"world").unwrap();

        let payload = segment.segment_mut();
        let mut buf = [0u8; 4];
        assert_eq!(payload.read(&mut buf), 4);
        assert_eq!(&buf, b"hell");

        let mut rest = [0u8; 32];
        let n = payload.read(&mut rest);
        assert_eq!(&rest[..n], b"o world");
        assert_eq!(payload.read(&mut rest), 0);
    }

    #[test]
    fn test_more_data_after_end_of_buffer() {
        let mut segment = MutableSegment::new(info(0), 0.0);
        segment.push(b"ab").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(segment.segment_mut().read(&mut buf), 2);
        assert_eq!(segment.segment_mut().read(&mut buf), 0);

        segment.push(b"cd").unwrap();
        assert_eq!(segment.segment_mut().read(&mut buf), 2);
        assert_eq!(&buf[..2], b"cd");
    }

    #[test]
    fn test_seek_is_clamped() {
        let mut segment = Segment::new(2.0);
        segment.push(&[1, 2, 3, 4]).unwrap();

        assert_eq!(segment.seek(2), 2);
        assert_eq!(segment.bytes_ready(), 2);
        assert_eq!(segment.seek(100), 4);
        assert_eq!(segment.bytes_ready(), 0);
        assert_eq!(segment.seek(0), 0);
    }

    #[test]
    fn test_free_keeps_metadata() {
        let mut segment = MutableSegment::new(info(3), 12.0);
        segment.push(&[0u8; 100]).unwrap();
        segment.data_ready();
        assert!(segment.is_valid());
        assert_eq!(segment.length(), 100);

        segment.free();

        assert!(!segment.is_valid());
        assert_eq!(segment.size(), 0);
        assert_eq!(segment.info().index, 3);
        assert_eq!(segment.time_offset(), 12.0);
        assert_eq!(segment.duration(), 6.0);
        assert_eq!(segment.length(), 100);
    }

    #[test]
    fn test_empty_push_is_noop() {
        let mut segment = MutableSegment::new(info(0), 0.0);
        segment.push(&[]).unwrap();
        assert_eq!(segment.size(), 0);
    }
}
