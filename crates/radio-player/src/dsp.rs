//! Integer post-processing shared by both codecs.
//!
//! Decoded audio goes through, in order: [`downmix_to_mono`],
//! [`resample_linear_q16`], [`apply_volume`]. The output pump later applies
//! [`apply_gain`]. All stages saturate to the `i16` range.

/// Average interleaved frames down to one channel.
///
/// Mono input is returned unchanged.
pub fn downmix_to_mono(samples: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Number of output samples produced for `input_len` source samples.
pub fn resampled_len(input_len: usize, src_rate: u32, dst_rate: u32) -> usize {
    if src_rate == 0 || src_rate == dst_rate {
        return input_len;
    }
    (input_len as u64 * dst_rate as u64 / src_rate as u64) as usize
}

/// Linear-interpolation resampler using a Q16 fixed-point step.
///
/// Output sample `i` blends the two source samples bracketing `i * src / dst`.
/// When the upper neighbour falls past the end of the input, the lower one is
/// used on its own. Equal rates return the input unchanged.
pub fn resample_linear_q16(input: &[i16], src_rate: u32, dst_rate: u32) -> Vec<i16> {
    if src_rate == dst_rate || src_rate == 0 || dst_rate == 0 || input.is_empty() {
        return input.to_vec();
    }
    let step = ((src_rate as u64) << 16) / dst_rate as u64;
    let out_len = resampled_len(input.len(), src_rate, dst_rate);
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len as u64 {
        let pos = i * step;
        let idx0 = (pos >> 16) as usize;
        let frac = (pos & 0xFFFF) as i64;
        let Some(&s0) = input.get(idx0) else {
            break;
        };
        let sample = match input.get(idx0 + 1) {
            Some(&s1) => s0 as i64 + (((s1 as i64 - s0 as i64) * frac) >> 16),
            None => s0 as i64,
        };
        out.push(sample as i16);
    }
    out
}

fn saturate(v: i32) -> i16 {
    v.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Scale by `volume` percent (`sample * volume / 100`) in place.
pub fn apply_volume(samples: &mut [i16], volume: u8) {
    if volume == 100 {
        return;
    }
    let vol = volume.min(100) as i32;
    for s in samples.iter_mut() {
        *s = saturate(*s as i32 * vol / 100);
    }
}

/// Multiply by a fixed gain in place, saturating.
pub fn apply_gain(samples: &mut [i16], gain: i32) {
    if gain == 1 {
        return;
    }
    for s in samples.iter_mut() {
        *s = saturate((*s as i32).saturating_mul(gain));
    }
}

/// Serialise samples as little-endian bytes for the PCM buffer.
pub fn samples_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Inverse of [`samples_to_le_bytes`]; a trailing odd byte is ignored.
pub fn le_bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}
