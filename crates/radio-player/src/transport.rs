//! HTTP access for playlists and media streams.
//!
//! The engine talks to the network only through [`HttpTransport`], so tests
//! can script responses without sockets. [`UreqTransport`] is the production
//! implementation.

use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use ureq::ResponseExt;
use ureq::unversioned::resolver::DefaultResolver;
use ureq::unversioned::transport::time::Duration as WireDuration;
use ureq::unversioned::transport::{
    Buffers, ConnectionDetails, Connector, NextTimeout, RustlsConnector, TcpConnector, Transport,
};

/// Longest single socket wait; the cancel flag is checked between waits.
const READ_SLICE: Duration = Duration::from_millis(100);

/// A small text document (playlist) read with a size cap.
#[derive(Debug, Clone)]
pub struct FetchedText {
    pub body: String,
    /// URL after redirects; relative playlist entries resolve against it.
    pub final_url: String,
    /// `true` when the body hit the size cap and was cut short.
    pub truncated: bool,
}

/// An open media response whose body is read incrementally.
pub struct StreamResponse {
    /// URL after redirects.
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    /// ICY metadata interval in bytes, if the server interleaves metadata.
    pub icy_metaint: Option<usize>,
    pub body: Box<dyn Read + Send>,
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("url", &self.url)
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("icy_metaint", &self.icy_metaint)
            .finish_non_exhaustive()
    }
}

/// How a media stream is requested and how long its body may go quiet.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// Ask the server to interleave ICY metadata.
    pub icy_metadata: bool,
    /// Bounds connecting and receiving the response headers.
    pub connect_timeout: Duration,
    /// Longest gap tolerated between body bytes.
    pub read_timeout: Duration,
    /// Raised to abandon the body; a pending read gives up within
    /// `READ_SLICE` and the connection is closed when the body drops.
    pub cancel: Arc<AtomicBool>,
}

/// Network seam used by the playlist resolver and the stream fetcher.
pub trait HttpTransport: Send + Sync {
    /// GET `url` and read at most `limit` bytes of its body as text.
    fn fetch_text(&self, url: &str, limit: usize, timeout: Duration)
    -> Result<FetchedText, String>;

    /// GET `url` and return the response with its body unread.
    ///
    /// Non-200 statuses are returned, not turned into errors; the caller
    /// decides what they mean.
    fn open_stream(&self, url: &str, request: &StreamRequest) -> Result<StreamResponse, String>;
}

/// [`HttpTransport`] backed by `ureq`.
///
/// Playlists share one agent. Each media stream gets its own agent whose
/// connector bounds every socket wait, so a server that sends headers and
/// then falls silent cannot pin the fetch thread.
#[derive(Clone)]
pub struct UreqTransport {
    config: ureq::config::Config,
    agent: ureq::Agent,
}

impl UreqTransport {
    /// `connect_timeout` bounds connecting and waiting for response headers.
    pub fn new(connect_timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_connect(Some(connect_timeout))
            .timeout_recv_response(Some(connect_timeout))
            .http_status_as_error(false)
            .user_agent(concat!("radio-player/", env!("CARGO_PKG_VERSION")))
            .build();
        let agent = ureq::Agent::from(config.clone());
        Self { config, agent }
    }

    fn stream_agent(&self, request: &StreamRequest) -> ureq::Agent {
        let connector = ()
            .chain(TcpConnector::default())
            .chain(WatchedConnector {
                cancel: request.cancel.clone(),
                idle: request.read_timeout,
            })
            .chain(RustlsConnector::default());
        ureq::Agent::with_parts(self.config.clone(), connector, DefaultResolver::default())
    }
}

/// Connector layer placed between TCP and TLS that wraps the socket in a
/// [`WatchedTransport`].
#[derive(Debug)]
struct WatchedConnector {
    cancel: Arc<AtomicBool>,
    idle: Duration,
}

impl<In: Transport> Connector<In> for WatchedConnector {
    type Out = WatchedTransport<In>;

    fn connect(
        &self,
        _details: &ConnectionDetails,
        chained: Option<In>,
    ) -> Result<Option<Self::Out>, ureq::Error> {
        Ok(chained.map(|inner| WatchedTransport {
            inner,
            cancel: self.cancel.clone(),
            idle: self.idle,
        }))
    }
}

/// Waits for socket input in `READ_SLICE` steps. Fails with `TimedOut`
/// after `idle` without input and with `ConnectionAborted` once `cancel`
/// is set.
#[derive(Debug)]
struct WatchedTransport<T> {
    inner: T,
    cancel: Arc<AtomicBool>,
    idle: Duration,
}

impl<T: Transport> Transport for WatchedTransport<T> {
    fn buffers(&mut self) -> &mut dyn Buffers {
        self.inner.buffers()
    }

    fn transmit_output(&mut self, amount: usize, timeout: NextTimeout) -> Result<(), ureq::Error> {
        self.inner.transmit_output(amount, timeout)
    }

    fn await_input(&mut self, timeout: NextTimeout) -> Result<bool, ureq::Error> {
        let started = Instant::now();
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(ureq::Error::Io(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "stream cancelled",
                )));
            }
            let waited = started.elapsed();
            let deadline_left = (*timeout.after).saturating_sub(waited);
            if deadline_left.is_zero() {
                return Err(ureq::Error::Timeout(timeout.reason));
            }
            let idle_left = self.idle.saturating_sub(waited);
            if idle_left.is_zero() {
                return Err(ureq::Error::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no data received for {} ms", self.idle.as_millis()),
                )));
            }
            let slice = READ_SLICE.min(deadline_left).min(idle_left);
            let step = NextTimeout {
                after: WireDuration::Exact(slice),
                reason: timeout.reason,
            };
            match self.inner.await_input(step) {
                Err(ureq::Error::Timeout(_)) => continue,
                other => return other,
            }
        }
    }

    fn is_open(&mut self) -> bool {
        self.inner.is_open()
    }

    fn is_tls(&self) -> bool {
        self.inner.is_tls()
    }
}

fn header_str(resp: &ureq::http::Response<ureq::Body>, name: &str) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
}

impl HttpTransport for UreqTransport {
    fn fetch_text(
        &self,
        url: &str,
        limit: usize,
        timeout: Duration,
    ) -> Result<FetchedText, String> {
        let resp = self
            .agent
            .get(url)
            .config()
            .timeout_global(Some(timeout))
            .build()
            .call()
            .map_err(|e| format!("playlist request failed: {e}"))?;

        let status = resp.status().as_u16();
        if status != 200 {
            return Err(format!("playlist request returned status {status}"));
        }
        let final_url = resp.get_uri().to_string();

        let (_, body) = resp.into_parts();
        let mut buf = Vec::with_capacity(limit.min(8192));
        body.into_reader()
            .take(limit as u64)
            .read_to_end(&mut buf)
            .map_err(|e| format!("playlist read failed: {e}"))?;
        let truncated = buf.len() >= limit;

        Ok(FetchedText {
            body: String::from_utf8_lossy(&buf).into_owned(),
            final_url,
            truncated,
        })
    }

    fn open_stream(&self, url: &str, request: &StreamRequest) -> Result<StreamResponse, String> {
        let mut req = self
            .stream_agent(request)
            .get(url)
            .config()
            .timeout_connect(Some(request.connect_timeout))
            .timeout_recv_response(Some(request.connect_timeout))
            .build();
        if request.icy_metadata {
            req = req.header("Icy-MetaData", "1");
        }
        let resp = req.call().map_err(|e| format!("stream request failed: {e}"))?;

        let status = resp.status().as_u16();
        let content_type = header_str(&resp, "content-type");
        let icy_metaint = header_str(&resp, "icy-metaint")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0);
        let final_url = resp.get_uri().to_string();

        tracing::debug!(
            url = %final_url,
            status,
            content_type = content_type.as_deref().unwrap_or(""),
            icy_metaint = ?icy_metaint,
            "stream response"
        );

        let (_, body) = resp.into_parts();
        Ok(StreamResponse {
            url: final_url,
            status,
            content_type,
            icy_metaint,
            body: Box::new(body.into_reader()),
        })
    }
}
