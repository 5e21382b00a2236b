//! Error types for the radio engine.

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, RadioError>;

/// Failures surfaced by the controller and the stream-opening path.
///
/// Worker threads never return these across the thread boundary; they record
/// an end reason on the session monitor instead.
#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    /// No station with this id exists in the directory.
    #[error("station not found: {0}")]
    NotFound(String),

    /// The HTTP request failed or returned a non-200 status.
    #[error("connection to {url} failed: {reason}")]
    ConnectionFailure { url: String, reason: String },

    /// The playlist was empty, unparseable, or nested too deeply.
    #[error("playlist {url} could not be resolved: {reason}")]
    PlaylistResolution { url: String, reason: String },

    /// The live playlist did not advance within the retry budget.
    #[error("live stream stalled after {retries} playlist retries")]
    StreamStalled { retries: u32 },

    /// The codec could not be set up for the session.
    #[error("decoder init failed: {0}")]
    DecoderInit(String),

    /// A ring buffer could not reserve its storage.
    #[error("could not allocate a {0} byte buffer")]
    BufferAllocation(usize),

    /// A pipeline thread could not be started.
    #[error("failed to spawn {stage} worker: {source}")]
    WorkerSpawn {
        stage: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl RadioError {
    pub(crate) fn connection(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        RadioError::ConnectionFailure {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn playlist(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        RadioError::PlaylistResolution {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error belongs to the connection-failure family.
    ///
    /// Playlist problems are reported to callers as connection failures.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            RadioError::ConnectionFailure { .. } | RadioError::PlaylistResolution { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playlist_errors_count_as_connection_failures() {
        assert!(RadioError::playlist("http://x/a.m3u8", "empty").is_connection_failure());
        assert!(RadioError::connection("http://x/", "status 404").is_connection_failure());
        assert!(!RadioError::NotFound("x".into()).is_connection_failure());
        assert!(!RadioError::StreamStalled { retries: 5 }.is_connection_failure());
    }

    #[test]
    fn messages_name_the_url() {
        let err = RadioError::connection("http://radio/live", "status 503");
        assert_eq!(err.to_string(), "connection to http://radio/live failed: status 503");
    }
}
