//! Engine tuning parameters.
//!
//! Every field has a default matching the behaviour the pipeline was tuned
//! for on small devices; the daemon may override any of them from TOML.

use std::time::Duration;

use serde::Deserialize;

/// Tunables for the fetch, decode and output stages.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Output sample rate in Hz (mono, 16-bit).
    pub target_rate_hz: u32,
    /// Capacity of the compressed byte buffer.
    pub compressed_buffer_bytes: usize,
    /// Capacity of the PCM byte buffer.
    pub pcm_buffer_bytes: usize,

    /// Bytes requested per socket read.
    pub fetch_chunk_bytes: usize,
    /// Bounded wait when pushing into the compressed buffer.
    pub fetch_write_timeout_ms: u64,
    /// Sleep after the compressed buffer refused data.
    pub fetch_backoff_ms: u64,
    /// Timeout for connecting and receiving response headers.
    pub connect_timeout_ms: u64,
    /// Longest silence tolerated on an open stream body.
    pub read_timeout_ms: u64,

    /// Timeout for a whole playlist request.
    pub playlist_timeout_ms: u64,
    /// Largest playlist body read; longer bodies are truncated.
    pub playlist_max_bytes: usize,
    /// Nested playlist bound.
    pub max_playlist_depth: usize,
    /// Wait after a segment ends before asking the playlist for the next one.
    pub hls_settle_ms: u64,
    /// Wait between attempts while the playlist has not advanced.
    pub hls_retry_delay_ms: u64,
    /// Attempts before a live stream is declared stalled.
    pub hls_max_retries: u32,

    /// MP3 frame-sync accumulator size.
    pub mp3_accumulator_bytes: usize,
    /// Bytes pulled from the compressed buffer per MP3 top-up.
    pub mp3_read_bytes: usize,
    /// Bytes pulled from the compressed buffer per AAC top-up.
    pub aac_read_bytes: usize,
    /// Read timeout for the MP3 path.
    pub mp3_read_timeout_ms: u64,
    /// Read timeout for the AAC path.
    pub aac_read_timeout_ms: u64,
    /// Decoder sleep when no input was available.
    pub decode_idle_ms: u64,
    /// Bounded wait when pushing PCM downstream.
    pub pcm_write_timeout_ms: u64,

    /// PCM bytes required before output starts.
    pub prebuffer_bytes: usize,
    /// Upper bound on the pre-buffer wait.
    pub prebuffer_timeout_ms: u64,
    /// Pre-buffer polling interval.
    pub prebuffer_poll_ms: u64,
    /// Samples forwarded to the sink per tick.
    pub output_chunk_samples: usize,
    /// Read timeout for the output pump.
    pub output_read_timeout_ms: u64,
    /// Output sleep when the PCM buffer was empty.
    pub output_idle_ms: u64,
    /// Output sleep while ducked.
    pub duck_poll_ms: u64,
    /// Final fixed gain applied before the sink.
    pub output_gain: i32,

    /// How long `stop` waits for the workers to exit.
    pub stop_grace_ms: u64,
    /// Volume applied when the player is created (0-100).
    pub default_volume: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_rate_hz: 16_000,
            compressed_buffer_bytes: 64 * 1024,
            pcm_buffer_bytes: 64 * 1024,

            fetch_chunk_bytes: 4096,
            fetch_write_timeout_ms: 1000,
            fetch_backoff_ms: 50,
            connect_timeout_ms: 5000,
            read_timeout_ms: 5000,

            playlist_timeout_ms: 5000,
            playlist_max_bytes: 64 * 1024,
            max_playlist_depth: 5,
            hls_settle_ms: 2000,
            hls_retry_delay_ms: 1000,
            hls_max_retries: 5,

            mp3_accumulator_bytes: 8192,
            mp3_read_bytes: 2048,
            aac_read_bytes: 4096,
            mp3_read_timeout_ms: 10,
            aac_read_timeout_ms: 100,
            decode_idle_ms: 20,
            pcm_write_timeout_ms: 50,

            prebuffer_bytes: 16_000,
            prebuffer_timeout_ms: 5000,
            prebuffer_poll_ms: 50,
            output_chunk_samples: 4096,
            output_read_timeout_ms: 20,
            output_idle_ms: 5,
            duck_poll_ms: 20,
            output_gain: 3,

            stop_grace_ms: 500,
            default_volume: 70,
        }
    }
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

impl EngineConfig {
    pub fn fetch_write_timeout(&self) -> Duration {
        ms(self.fetch_write_timeout_ms)
    }

    pub fn fetch_backoff(&self) -> Duration {
        ms(self.fetch_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        ms(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        ms(self.read_timeout_ms)
    }

    pub fn playlist_timeout(&self) -> Duration {
        ms(self.playlist_timeout_ms)
    }

    pub fn hls_settle(&self) -> Duration {
        ms(self.hls_settle_ms)
    }

    pub fn hls_retry_delay(&self) -> Duration {
        ms(self.hls_retry_delay_ms)
    }

    pub fn decode_idle(&self) -> Duration {
        ms(self.decode_idle_ms)
    }

    pub fn pcm_write_timeout(&self) -> Duration {
        ms(self.pcm_write_timeout_ms)
    }

    pub fn prebuffer_timeout(&self) -> Duration {
        ms(self.prebuffer_timeout_ms)
    }

    pub fn prebuffer_poll(&self) -> Duration {
        ms(self.prebuffer_poll_ms)
    }

    pub fn output_read_timeout(&self) -> Duration {
        ms(self.output_read_timeout_ms)
    }

    pub fn output_idle(&self) -> Duration {
        ms(self.output_idle_ms)
    }

    pub fn duck_poll(&self) -> Duration {
        ms(self.duck_poll_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        ms(self.stop_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cushion_is_half_a_second_of_output() {
        let cfg = EngineConfig::default();
        let bytes_per_second = cfg.target_rate_hz as usize * 2;
        assert_eq!(cfg.prebuffer_bytes * 2, bytes_per_second);
    }

    #[test]
    fn duration_helpers_use_milliseconds() {
        let cfg = EngineConfig {
            stop_grace_ms: 250,
            ..EngineConfig::default()
        };
        assert_eq!(cfg.stop_grace(), Duration::from_millis(250));
        assert_eq!(cfg.playlist_timeout(), Duration::from_secs(5));
    }
}
