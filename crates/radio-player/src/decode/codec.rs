//! Symphonia-backed frame decoder for MP3 and ADTS AAC.
//!
//! Symphonia normally sits behind a format reader; here frames are located
//! by [`sync_frame`](super::frame::sync_frame) and fed to the codec as
//! packets directly. The codec is (re)built whenever the frame header
//! announces a different sample rate or channel layout.

use radio_types::StreamCodec;
use symphonia::core::audio::{Channels, SampleBuffer};
use symphonia::core::codecs::{
    CODEC_TYPE_AAC, CODEC_TYPE_MP3, CodecParameters, Decoder, DecoderOptions,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;

use super::frame::{FrameHeader, FrameSync, sync_frame};
use super::{DecodeOutcome, DecodedPcm, FrameDecoder};
use crate::error::{RadioError, Result};

fn channel_layout(count: u16) -> Channels {
    const ORDER: [Channels; 8] = [
        Channels::FRONT_LEFT,
        Channels::FRONT_RIGHT,
        Channels::FRONT_CENTRE,
        Channels::LFE1,
        Channels::REAR_LEFT,
        Channels::REAR_RIGHT,
        Channels::SIDE_LEFT,
        Channels::SIDE_RIGHT,
    ];
    ORDER
        .iter()
        .take(count.clamp(1, 8) as usize)
        .fold(Channels::empty(), |acc, c| acc | *c)
}

/// Two-byte AudioSpecificConfig equivalent to an ADTS header.
fn audio_specific_config(header: &FrameHeader) -> Box<[u8]> {
    let asc: u16 = ((header.object_type as u16) << 11)
        | ((header.sf_index as u16) << 7)
        | ((header.channel_config as u16) << 3);
    Box::new(asc.to_be_bytes())
}

fn codec_parameters(codec: StreamCodec, header: &FrameHeader) -> CodecParameters {
    let mut params = CodecParameters::new();
    match codec {
        StreamCodec::Mp3 => {
            params.for_codec(CODEC_TYPE_MP3);
        }
        StreamCodec::Aac => {
            params
                .for_codec(CODEC_TYPE_AAC)
                .with_extra_data(audio_specific_config(header));
        }
    }
    params
        .with_sample_rate(header.sample_rate)
        .with_channels(channel_layout(header.channels))
        .with_max_frames_per_packet(header.samples_per_frame as u64);
    params
}

fn make_decoder(codec: StreamCodec, header: &FrameHeader) -> Result<Box<dyn Decoder>> {
    let params = codec_parameters(codec, header);
    symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| RadioError::DecoderInit(format!("{} decoder: {e}", codec.as_str())))
}

/// [`FrameDecoder`] over a Symphonia codec.
pub struct SymphoniaFrameDecoder {
    codec: StreamCodec,
    decoder: Option<Box<dyn Decoder>>,
    layout: Option<(u32, u16)>,
    ts: u64,
    errors: u64,
}

impl SymphoniaFrameDecoder {
    /// Check the codec is available by building it for a typical layout.
    ///
    /// The real decoder is created lazily from the first frame header.
    pub fn new(codec: StreamCodec) -> Result<Self> {
        let typical = match codec {
            StreamCodec::Mp3 => FrameHeader {
                sample_rate: 44_100,
                channels: 2,
                frame_len: 417,
                header_len: 4,
                samples_per_frame: 1152,
                object_type: 0,
                sf_index: 0,
                channel_config: 0,
            },
            StreamCodec::Aac => FrameHeader {
                sample_rate: 44_100,
                channels: 2,
                frame_len: 0,
                header_len: 7,
                samples_per_frame: 1024,
                object_type: 2,
                sf_index: 4,
                channel_config: 2,
            },
        };
        let decoder = make_decoder(codec, &typical)?;
        Ok(Self {
            codec,
            decoder: Some(decoder),
            layout: Some((typical.sample_rate, typical.channels)),
            ts: 0,
            errors: 0,
        })
    }

    fn decoder_for(&mut self, header: &FrameHeader) -> Option<&mut Box<dyn Decoder>> {
        let layout = (header.sample_rate, header.channels);
        if self.layout != Some(layout) || self.decoder.is_none() {
            match make_decoder(self.codec, header) {
                Ok(d) => {
                    tracing::debug!(
                        codec = self.codec.as_str(),
                        rate_hz = header.sample_rate,
                        channels = header.channels,
                        "codec configured"
                    );
                    self.decoder = Some(d);
                    self.layout = Some(layout);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "codec rebuild failed");
                    self.decoder = None;
                    self.layout = None;
                }
            }
        }
        self.decoder.as_mut()
    }

    fn note_error(&mut self, err: &SymphoniaError) {
        self.errors += 1;
        if self.errors <= 5 || self.errors % 200 == 0 {
            tracing::warn!(
                codec = self.codec.as_str(),
                errors = self.errors,
                "frame decode error: {err}"
            );
        }
    }
}

impl FrameDecoder for SymphoniaFrameDecoder {
    fn codec(&self) -> StreamCodec {
        self.codec
    }

    fn decode_frame(&mut self, input: &[u8]) -> DecodeOutcome {
        let header = match sync_frame(self.codec, input) {
            FrameSync::NeedMore => return DecodeOutcome::NeedMoreData,
            FrameSync::Junk(n) => return DecodeOutcome::Skipped { consumed: n },
            FrameSync::Frame(h) => h,
        };
        let consumed = header.frame_len;
        let payload = match self.codec {
            StreamCodec::Mp3 => &input[..header.frame_len],
            StreamCodec::Aac => &input[header.header_len..header.frame_len],
        };
        let ts = self.ts;
        self.ts += header.samples_per_frame as u64;

        let Some(decoder) = self.decoder_for(&header) else {
            return DecodeOutcome::Skipped { consumed };
        };
        let packet = Packet::new_from_slice(0, ts, header.samples_per_frame as u64, payload);
        let decoded = decoder.decode(&packet).map(|decoded| {
            let spec = *decoded.spec();
            let frames = decoded.frames();
            if frames == 0 {
                return None;
            }
            let mut buf = SampleBuffer::<i16>::new(frames as u64, spec);
            buf.copy_interleaved_ref(decoded);
            Some(DecodedPcm {
                samples: buf.samples().to_vec(),
                sample_rate: spec.rate,
                channels: spec.channels.count() as u16,
            })
        });
        let result = match decoded {
            Ok(pcm) => pcm,
            Err(SymphoniaError::ResetRequired) => {
                if let Some(d) = self.decoder.as_mut() {
                    d.reset();
                }
                None
            }
            Err(e) => {
                self.note_error(&e);
                None
            }
        };

        match result {
            Some(pcm) => DecodeOutcome::Frame { consumed, pcm },
            None => DecodeOutcome::Skipped { consumed },
        }
    }
}
