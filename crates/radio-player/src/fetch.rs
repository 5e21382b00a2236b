//! Stream fetcher: owns the HTTP body and feeds the compressed buffer.
//!
//! ```text
//! Connecting -> Streaming -> (SegmentBoundary -> Streaming)* -> Ended | Failed
//! ```
//!
//! The compressed buffer, not the socket, governs backpressure: when it is
//! full the fetcher retries the unwritten remainder after a short back-off
//! and never drops bytes.

use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use radio_types::{DeclaredFormat, SessionEndReason, StationDescriptor, StreamCodec};

use crate::config::EngineConfig;
use crate::error::{RadioError, Result};
use crate::icy::IcyDemuxer;
use crate::playlist::{
    FollowOutcome, SegmentCursor, follow_next_segment, is_playlist, resolve_playlist,
};
use crate::ring_buffer::ByteRingBuffer;
use crate::sleep_unless_stopped;
use crate::status::SessionMonitor;
use crate::transport::{HttpTransport, StreamRequest, StreamResponse};

/// Choose the codec for a session.
///
/// A declared format wins; otherwise the `Content-Type` is matched by
/// substring; MP3 is the fallback.
pub fn detect_codec(declared: DeclaredFormat, content_type: Option<&str>) -> StreamCodec {
    match declared {
        DeclaredFormat::Mp3 => return StreamCodec::Mp3,
        DeclaredFormat::Aac => return StreamCodec::Aac,
        DeclaredFormat::Unknown => {}
    }
    let ct = content_type.unwrap_or("").to_ascii_lowercase();
    if ct.contains("mp3") || ct.contains("mpeg") {
        StreamCodec::Mp3
    } else if ct.contains("aac") || ct.contains("mp4") || ct.contains("m4a") {
        StreamCodec::Aac
    } else {
        StreamCodec::Mp3
    }
}

/// A stream that passed the open checks and is ready to be pumped.
#[derive(Debug)]
pub struct OpenedStream {
    pub response: StreamResponse,
    pub codec: StreamCodec,
    /// Playlist to re-poll at segment boundaries; `None` for plain streams.
    pub playlist_url: Option<String>,
    /// Media URL actually opened.
    pub media_url: String,
}

fn stream_request(
    cfg: &EngineConfig,
    icy_metadata: bool,
    cancel: &Arc<AtomicBool>,
) -> StreamRequest {
    StreamRequest {
        icy_metadata,
        connect_timeout: cfg.connect_timeout(),
        read_timeout: cfg.read_timeout(),
        cancel: cancel.clone(),
    }
}

/// Resolve and open a station's stream and pick its codec.
///
/// ICY metadata is only requested for plain (non-HLS) streams. Raising
/// `stop` abandons the body, including a read that is already waiting.
pub fn open_station_stream(
    transport: &dyn HttpTransport,
    station: &StationDescriptor,
    cfg: &EngineConfig,
    stop: &Arc<AtomicBool>,
) -> Result<OpenedStream> {
    let hls = is_playlist(&station.url);
    let media_url = if hls {
        resolve_playlist(transport, &station.url, cfg)?
    } else {
        station.url.clone()
    };

    let response = transport
        .open_stream(&media_url, &stream_request(cfg, !hls, stop))
        .map_err(|e| RadioError::connection(&media_url, e))?;
    if response.status != 200 {
        return Err(RadioError::connection(
            &media_url,
            format!("HTTP status {}", response.status),
        ));
    }

    let codec = detect_codec(station.declared_format, response.content_type.as_deref());
    tracing::info!(
        station = %station.id,
        url = %media_url,
        codec = codec.as_str(),
        content_type = response.content_type.as_deref().unwrap_or(""),
        hls,
        "stream opened"
    );

    Ok(OpenedStream {
        response,
        codec,
        playlist_url: hls.then(|| station.url.clone()),
        media_url,
    })
}

/// Everything the fetch thread needs, owned.
pub(crate) struct FetchWorker {
    pub transport: Arc<dyn HttpTransport>,
    pub compressed: Arc<ByteRingBuffer>,
    pub monitor: Arc<SessionMonitor>,
    pub stop: Arc<AtomicBool>,
    /// Raised on exit so the decoder can finish once the buffer drains.
    pub upstream_done: Arc<AtomicBool>,
    pub cfg: EngineConfig,
}

impl FetchWorker {
    fn body_reader(&self, response: StreamResponse) -> Box<dyn Read + Send> {
        match response.icy_metaint {
            Some(metaint) => {
                tracing::debug!(metaint, "stripping icy metadata");
                let monitor = self.monitor.clone();
                Box::new(
                    IcyDemuxer::new(response.body, metaint)
                        .on_title(move |title| monitor.set_stream_title(title)),
                )
            }
            None => response.body,
        }
    }

    /// Write all of `data`, backing off while the buffer is full.
    ///
    /// Returns `false` if the stop flag was raised first.
    fn push(&self, data: &[u8], full_events: &mut u64) -> bool {
        let mut offset = 0;
        while offset < data.len() {
            if self.stop.load(Ordering::Relaxed) {
                return false;
            }
            offset += self
                .compressed
                .write(&data[offset..], self.cfg.fetch_write_timeout());
            if offset < data.len() {
                *full_events += 1;
                if *full_events <= 3 || *full_events % 100 == 0 {
                    tracing::warn!(
                        events = *full_events,
                        pending = data.len() - offset,
                        "compressed buffer full, backing off"
                    );
                }
                if !sleep_unless_stopped(&self.stop, self.cfg.fetch_backoff()) {
                    return false;
                }
            }
        }
        true
    }

    /// Pump `opened` (and, for HLS, its successors) until the session ends.
    pub fn run(self, opened: OpenedStream) {
        let OpenedStream {
            response,
            playlist_url,
            media_url,
            ..
        } = opened;

        let mut cursor = SegmentCursor::starting_at(&media_url);
        let mut body = self.body_reader(response);
        let mut chunk = vec![0u8; self.cfg.fetch_chunk_bytes.max(1)];
        let mut full_events = 0u64;
        SessionMonitor::add(&self.monitor.segments_fetched, 1);

        let (reason, message) = loop {
            if self.stop.load(Ordering::Relaxed) {
                break (SessionEndReason::Stopped, None);
            }
            match body.read(&mut chunk) {
                Ok(0) => {
                    let Some(playlist) = playlist_url.as_deref() else {
                        tracing::info!(url = %media_url, "stream body ended");
                        break (SessionEndReason::Eof, None);
                    };
                    tracing::debug!(segment = ?cursor.last_url, "hls segment ended");
                    match follow_next_segment(
                        self.transport.as_ref(),
                        playlist,
                        &mut cursor,
                        &self.cfg,
                        &self.stop,
                    ) {
                        Ok(FollowOutcome::NewSegment(url)) => {
                            let request = stream_request(&self.cfg, false, &self.stop);
                            match self.transport.open_stream(&url, &request) {
                                Ok(resp) if resp.status == 200 => {
                                    self.monitor.set_stream_url(&url);
                                    SessionMonitor::add(&self.monitor.segments_fetched, 1);
                                    body = self.body_reader(resp);
                                }
                                Ok(resp) => {
                                    let status = format!("HTTP status {}", resp.status);
                                    let err = RadioError::connection(&url, status);
                                    break (SessionEndReason::Error, Some(err.to_string()));
                                }
                                Err(e) => {
                                    let err = RadioError::connection(&url, e);
                                    break (SessionEndReason::Error, Some(err.to_string()));
                                }
                            }
                        }
                        Ok(FollowOutcome::Stopped) => break (SessionEndReason::Stopped, None),
                        Err(e) => break (SessionEndReason::Stalled, Some(e.to_string())),
                    }
                }
                Ok(n) => {
                    if !self.push(&chunk[..n], &mut full_events) {
                        break (SessionEndReason::Stopped, None);
                    }
                    SessionMonitor::add(&self.monitor.bytes_fetched, n as u64);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) if self.stop.load(Ordering::Relaxed) => {
                    break (SessionEndReason::Stopped, None);
                }
                Err(e) => {
                    let message = format!("stream read failed: {e}");
                    break (SessionEndReason::Error, Some(message));
                }
            }
        };
        drop(body);

        match &message {
            Some(msg) => tracing::warn!(reason = ?reason, error = %msg, "fetcher exiting"),
            None => tracing::debug!(reason = ?reason, "fetcher exiting"),
        }
        self.monitor.record_end(reason, message);
        self.upstream_done.store(true, Ordering::Release);
    }
}
