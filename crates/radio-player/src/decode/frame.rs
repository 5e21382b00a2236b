//! Frame synchronisation for raw MP3 and ADTS AAC elementary streams.
//!
//! HTTP chunk boundaries never line up with codec frames, so the decoder
//! scans its accumulator for a plausible header, checks that the following
//! header (when already buffered) is valid too, and only then hands the
//! exact frame bytes to the codec.

use radio_types::StreamCodec;

/// Parsed fields of one frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub sample_rate: u32,
    pub channels: u16,
    /// Total frame length including the header.
    pub frame_len: usize,
    /// Header bytes preceding the payload.
    pub header_len: usize,
    pub samples_per_frame: usize,
    /// ADTS only: audio object type (2 = AAC-LC).
    pub object_type: u8,
    /// ADTS only: sampling frequency index.
    pub sf_index: u8,
    /// ADTS only: channel configuration field.
    pub channel_config: u8,
}

const MP3_BITRATES_V1: [u32; 15] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320,
];
const MP3_BITRATES_V2: [u32; 15] = [
    0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160,
];

/// Sampling frequencies addressed by the ADTS `sf_index` field.
pub const ADTS_SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

pub const MP3_HEADER_LEN: usize = 4;
pub const ADTS_HEADER_LEN: usize = 7;

/// Parse an MPEG-1/2/2.5 Layer III header at the start of `b`.
///
/// Free-format and reserved values are rejected.
pub fn parse_mp3_header(b: &[u8]) -> Option<FrameHeader> {
    if b.len() < MP3_HEADER_LEN || b[0] != 0xFF || b[1] & 0xE0 != 0xE0 {
        return None;
    }
    let version = (b[1] >> 3) & 0x03;
    let layer = (b[1] >> 1) & 0x03;
    if version == 1 || layer != 1 {
        return None;
    }
    let bitrate_index = (b[2] >> 4) as usize;
    let rate_index = ((b[2] >> 2) & 0x03) as usize;
    if bitrate_index == 0 || bitrate_index == 15 || rate_index == 3 {
        return None;
    }
    let padding = ((b[2] >> 1) & 0x01) as usize;
    let mono = (b[3] >> 6) == 0x03;

    let mpeg1 = version == 3;
    let base_rate = [44_100, 48_000, 32_000][rate_index];
    let sample_rate = match version {
        3 => base_rate,
        2 => base_rate / 2,
        _ => base_rate / 4,
    };
    let bitrate_kbps = if mpeg1 {
        MP3_BITRATES_V1[bitrate_index]
    } else {
        MP3_BITRATES_V2[bitrate_index]
    };
    let (coef, samples_per_frame) = if mpeg1 { (144_000, 1152) } else { (72_000, 576) };
    let frame_len = (coef * bitrate_kbps / sample_rate) as usize + padding;

    Some(FrameHeader {
        sample_rate,
        channels: if mono { 1 } else { 2 },
        frame_len,
        header_len: MP3_HEADER_LEN,
        samples_per_frame,
        object_type: 0,
        sf_index: 0,
        channel_config: 0,
    })
}

/// Parse an ADTS header at the start of `b`.
pub fn parse_adts_header(b: &[u8]) -> Option<FrameHeader> {
    if b.len() < ADTS_HEADER_LEN || b[0] != 0xFF || b[1] & 0xF6 != 0xF0 {
        return None;
    }
    let protection_absent = b[1] & 0x01 == 1;
    let object_type = ((b[2] >> 6) & 0x03) + 1;
    let sf_index = (b[2] >> 2) & 0x0F;
    let sample_rate = *ADTS_SAMPLE_RATES.get(sf_index as usize)?;
    let channel_config = ((b[2] & 0x01) << 2) | (b[3] >> 6);
    let frame_len =
        (((b[3] & 0x03) as usize) << 11) | ((b[4] as usize) << 3) | ((b[5] >> 5) as usize);
    let header_len = if protection_absent { ADTS_HEADER_LEN } else { ADTS_HEADER_LEN + 2 };
    if frame_len <= header_len {
        return None;
    }
    let raw_blocks = (b[6] & 0x03) as usize + 1;

    Some(FrameHeader {
        sample_rate,
        // Config 0 means the layout lives in the payload; stereo is the
        // overwhelmingly common case for radio.
        channels: match channel_config {
            0 => 2,
            7 => 8,
            n => n as u16,
        },
        frame_len,
        header_len,
        samples_per_frame: 1024 * raw_blocks,
        object_type,
        sf_index,
        channel_config,
    })
}

fn parse_header(codec: StreamCodec, b: &[u8]) -> Option<FrameHeader> {
    match codec {
        StreamCodec::Mp3 => parse_mp3_header(b),
        StreamCodec::Aac => parse_adts_header(b),
    }
}

fn min_header_len(codec: StreamCodec) -> usize {
    match codec {
        StreamCodec::Mp3 => MP3_HEADER_LEN,
        StreamCodec::Aac => ADTS_HEADER_LEN,
    }
}

/// Result of scanning an accumulator for the next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSync {
    /// A complete frame starts at offset 0.
    Frame(FrameHeader),
    /// The leading `n` bytes cannot start a frame and may be dropped.
    Junk(usize),
    /// A frame may start at offset 0 but is not complete yet.
    NeedMore,
}

/// Locate the next frame in `input`.
pub fn sync_frame(codec: StreamCodec, input: &[u8]) -> FrameSync {
    let header_len = min_header_len(codec);
    let mut i = 0;
    while i < input.len() {
        if input[i] != 0xFF {
            i += 1;
            continue;
        }
        let rest = &input[i..];
        if rest.len() < header_len {
            break;
        }
        let Some(header) = parse_header(codec, rest) else {
            i += 1;
            continue;
        };
        if rest.len() < header.frame_len {
            break;
        }
        if rest.len() >= header.frame_len + header_len
            && parse_header(codec, &rest[header.frame_len..]).is_none()
        {
            // Emulated sync word inside audio data.
            i += 1;
            continue;
        }
        return if i == 0 { FrameSync::Frame(header) } else { FrameSync::Junk(i) };
    }
    if i == 0 {
        FrameSync::NeedMore
    } else {
        FrameSync::Junk(i)
    }
}
