//! Streamhold - stream buffering for IPTV playback
//!
//! This library crate wires the caches from `streamhold-cache` to real
//! transports and exposes the player-facing streams for the CLI and for
//! integration testing.

pub mod config;
pub mod hls;
pub mod recording;
pub mod timeshift;
pub mod transport;

/// Whether `url` points at an M3U/M3U8 playlist rather than a raw stream.
pub fn is_playlist_url(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.ends_with(".m3u8") || path.ends_with(".m3u")
}
