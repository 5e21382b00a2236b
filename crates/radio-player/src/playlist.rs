//! HLS (M3U8) playlist resolution and live segment following.
//!
//! Only the subset needed for audio-only live radio is understood: the last
//! URI line of a playlist is taken as the newest entry, and nested variant
//! playlists are followed until a media segment is reached.

use std::sync::atomic::AtomicBool;

use url::Url;

use crate::config::EngineConfig;
use crate::error::{RadioError, Result};
use crate::sleep_unless_stopped;
use crate::transport::HttpTransport;

/// Pick the newest URI of a playlist body and make it absolute against `base`.
///
/// Comment (`#`) and blank lines are skipped. Returns `None` when no URI line
/// exists or it cannot be joined onto `base`.
pub fn parse_playlist(body: &str, base: &Url) -> Option<Url> {
    let last = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .last()?;
    base.join(last).ok()
}

/// Whether `url` points at another playlist rather than media.
pub fn is_playlist_url(url: &Url) -> bool {
    url.path().to_ascii_lowercase().ends_with(".m3u8")
}

/// Like [`is_playlist_url`] for unparsed input; unparseable strings are not playlists.
pub fn is_playlist(url: &str) -> bool {
    Url::parse(url).map(|u| is_playlist_url(&u)).unwrap_or(false)
}

/// Resolve `url` down to a media segment URL, following nested playlists.
///
/// Fails with [`RadioError::PlaylistResolution`] when a playlist has no URI
/// lines, cannot be fetched, or nesting exceeds `max_playlist_depth`.
pub fn resolve_playlist(
    transport: &dyn HttpTransport,
    url: &str,
    cfg: &EngineConfig,
) -> Result<String> {
    let mut current = url.to_string();
    for depth in 0..=cfg.max_playlist_depth {
        let fetched = transport
            .fetch_text(&current, cfg.playlist_max_bytes, cfg.playlist_timeout())
            .map_err(|e| RadioError::playlist(&current, e))?;

        let mut body = fetched.body.as_str();
        if fetched.truncated {
            // A cut-off last line may be half a URI.
            body = body.rfind('\n').map(|i| &body[..i]).unwrap_or("");
            tracing::warn!(url = %current, "playlist truncated at size cap");
        }

        let base = Url::parse(&fetched.final_url)
            .or_else(|_| Url::parse(&current))
            .map_err(|e| RadioError::playlist(&current, e))?;
        let next = parse_playlist(body, &base)
            .ok_or_else(|| RadioError::playlist(&current, "no media entries"))?;

        if !is_playlist_url(&next) {
            tracing::debug!(playlist = %current, segment = %next, depth, "playlist resolved");
            return Ok(next.to_string());
        }
        tracing::debug!(playlist = %current, nested = %next, depth, "following nested playlist");
        current = next.to_string();
    }
    Err(RadioError::playlist(
        url,
        format!("nested deeper than {} levels", cfg.max_playlist_depth),
    ))
}

/// Sequence token of a segment URL: the text between the last `_` and the
/// last `.` of its path, e.g. `100` for `.../seg_100.aac`.
pub fn sequence_token(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let underscore = path.rfind('_')?;
    let dot = path.rfind('.')?;
    if dot <= underscore + 1 {
        return None;
    }
    Some(&path[underscore + 1..dot])
}

/// Tracks the last fetched segment of a live playlist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentCursor {
    pub last_url: Option<String>,
    pub last_sequence: Option<String>,
}

impl SegmentCursor {
    pub fn starting_at(url: &str) -> Self {
        let mut cursor = Self::default();
        cursor.advance(url);
        cursor
    }

    /// Whether `candidate` is a segment that has not been fetched yet.
    ///
    /// Sequence tokens are compared when both URLs carry one; otherwise the
    /// whole URLs are compared.
    pub fn is_new(&self, candidate: &str) -> bool {
        match (self.last_sequence.as_deref(), sequence_token(candidate)) {
            (Some(prev), Some(next)) => prev != next,
            _ => self.last_url.as_deref() != Some(candidate),
        }
    }

    pub fn advance(&mut self, url: &str) {
        self.last_url = Some(url.to_string());
        self.last_sequence = sequence_token(url).map(str::to_string);
    }
}

/// Result of waiting for the next live segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowOutcome {
    /// A segment newer than the cursor; the cursor has been advanced.
    NewSegment(String),
    /// The stop flag was raised while waiting.
    Stopped,
}

/// Wait for `playlist_url` to advance past `cursor`.
///
/// Sleeps `hls_settle` first, then re-resolves the playlist up to
/// `hls_max_retries` times, `hls_retry_delay` apart. Failed resolutions count
/// as attempts. Exhausting the attempts yields [`RadioError::StreamStalled`].
pub fn follow_next_segment(
    transport: &dyn HttpTransport,
    playlist_url: &str,
    cursor: &mut SegmentCursor,
    cfg: &EngineConfig,
    stop: &AtomicBool,
) -> Result<FollowOutcome> {
    if !sleep_unless_stopped(stop, cfg.hls_settle()) {
        return Ok(FollowOutcome::Stopped);
    }

    for attempt in 1..=cfg.hls_max_retries {
        match resolve_playlist(transport, playlist_url, cfg) {
            Ok(next) if cursor.is_new(&next) => {
                tracing::debug!(segment = %next, attempt, "next live segment");
                cursor.advance(&next);
                return Ok(FollowOutcome::NewSegment(next));
            }
            Ok(same) => {
                tracing::debug!(segment = %same, attempt, "playlist has not advanced yet");
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt, "playlist refresh failed");
            }
        }
        if attempt < cfg.hls_max_retries && !sleep_unless_stopped(stop, cfg.hls_retry_delay()) {
            return Ok(FollowOutcome::Stopped);
        }
    }
    Err(RadioError::StreamStalled {
        retries: cfg.hls_max_retries,
    })
}
