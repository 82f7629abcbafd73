//! Sample conversion
//!
//! Provides:
//! - `decode_into`: raw PCM bytes → interleaved f32 at the output channel count
//!   (sign swap, endian swap, channel up/down-mix)
//! - `encode_into`: interleaved f32 → raw PCM bytes for recording sinks
//! - `Resampler`: dithered fractional-step rate adaptation used in the
//!   realtime callback

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::PcmFormat;

// ═══════════════════════════════════════════════════════════════════════════════
// DECODE
// ═══════════════════════════════════════════════════════════════════════════════

#[inline]
fn read_sample(bytes: &[u8], bits: u16, swap_sign: bool, swap_endian: bool) -> f32 {
    match bits {
        8 => {
            let raw = bytes[0];
            let value = if swap_sign { raw as i32 - 128 } else { raw as i8 as i32 };
            value as f32 / 128.0
        }
        16 => {
            let mut raw = u16::from_ne_bytes([bytes[0], bytes[1]]);
            if swap_endian {
                raw = raw.swap_bytes();
            }
            let value = if swap_sign { raw as i32 - 32768 } else { raw as i16 as i32 };
            value as f32 / 32768.0
        }
        24 => {
            let little = cfg!(target_endian = "little") != swap_endian;
            let (lo, mid, hi) = if little {
                (bytes[0], bytes[1], bytes[2])
            } else {
                (bytes[2], bytes[1], bytes[0])
            };
            let raw = lo as u32 | (mid as u32) << 8 | (hi as u32) << 16;
            let value = if swap_sign {
                raw as i32 - 0x80_0000
            } else {
                ((raw << 8) as i32) >> 8
            };
            value as f32 / 8_388_608.0
        }
        _ => {
            let mut raw = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            if swap_endian {
                raw = raw.swap_bytes();
            }
            let value = if swap_sign {
                raw as i64 - 0x8000_0000
            } else {
                raw as i32 as i64
            };
            (value as f64 / 2_147_483_648.0) as f32
        }
    }
}

/// Map one interleaved frame from `src` channels onto `dst` channels.
///
/// Down-mix to mono averages; otherwise channels repeat cyclically or drop.
#[inline]
fn map_channels(src: &[f32], dst: &mut [f32]) {
    if src.len() == dst.len() {
        dst.copy_from_slice(src);
    } else if dst.len() == 1 {
        dst[0] = src.iter().sum::<f32>() / src.len() as f32;
    } else {
        for (c, out) in dst.iter_mut().enumerate() {
            *out = src[c % src.len()];
        }
    }
}

/// Decode whole frames of `src` into `dst` (cleared first).
///
/// Trailing bytes that do not form a whole frame are ignored. Returns the
/// number of frames decoded. `dst` only grows if its capacity is too small.
pub fn decode_into(
    src: &[u8],
    format: &PcmFormat,
    swap_sign: bool,
    swap_endian: bool,
    out_channels: usize,
    dst: &mut Vec<f32>,
) -> usize {
    dst.clear();
    let frame_bytes = format.frame_bytes();
    let sample_bytes = format.sample_bytes();
    let in_channels = format.channels as usize;
    if frame_bytes == 0 || out_channels == 0 {
        return 0;
    }

    let frames = src.len() / frame_bytes;
    let mut scratch = [0.0f32; 32];
    let mut mapped = [0.0f32; 32];
    let in_ch = in_channels.min(scratch.len());
    let out_ch = out_channels.min(mapped.len());

    for frame in src.chunks_exact(frame_bytes) {
        for (c, slot) in scratch[..in_ch].iter_mut().enumerate() {
            let at = c * sample_bytes;
            *slot = read_sample(&frame[at..at + sample_bytes], format.sample_width_bits, swap_sign, swap_endian);
        }
        map_channels(&scratch[..in_ch], &mut mapped[..out_ch]);
        dst.extend_from_slice(&mapped[..out_ch]);
        // Channels beyond the scratch width are silent
        dst.extend(std::iter::repeat_n(0.0, out_channels - out_ch));
    }

    frames
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENCODE
// ═══════════════════════════════════════════════════════════════════════════════

#[inline]
fn write_sample(value: f32, format: &PcmFormat, dst: &mut Vec<u8>) {
    let value = value.clamp(-1.0, 1.0) as f64;
    match format.sample_width_bits {
        8 => {
            let v = (value * 127.0).round() as i32;
            let byte = if format.is_signed { v as i8 as u8 } else { (v + 128) as u8 };
            dst.push(byte);
        }
        16 => {
            let v = (value * 32767.0).round() as i32;
            let raw = if format.is_signed { v as i16 as u16 } else { (v + 32768) as u16 };
            if format.is_big_endian {
                dst.extend_from_slice(&raw.to_be_bytes());
            } else {
                dst.extend_from_slice(&raw.to_le_bytes());
            }
        }
        24 => {
            let v = (value * 8_388_607.0).round() as i32;
            let raw = (if format.is_signed { v as u32 } else { (v + 0x80_0000) as u32 }) & 0xFF_FFFF;
            let le = [raw as u8, (raw >> 8) as u8, (raw >> 16) as u8];
            if format.is_big_endian {
                dst.extend_from_slice(&[le[2], le[1], le[0]]);
            } else {
                dst.extend_from_slice(&le);
            }
        }
        _ => {
            let v = (value * 2_147_483_647.0).round() as i64;
            let raw = if format.is_signed { v as i32 as u32 } else { (v + 0x8000_0000) as u32 };
            if format.is_big_endian {
                dst.extend_from_slice(&raw.to_be_bytes());
            } else {
                dst.extend_from_slice(&raw.to_le_bytes());
            }
        }
    }
}

/// Encode interleaved `src` (with `src_channels`) into `format` bytes,
/// appending to `dst`
pub fn encode_into(src: &[f32], src_channels: usize, format: &PcmFormat, dst: &mut Vec<u8>) {
    if src_channels == 0 {
        return;
    }
    let out_ch = (format.channels as usize).min(32);
    let mut mapped = [0.0f32; 32];
    for frame in src.chunks_exact(src_channels) {
        map_channels(frame, &mut mapped[..out_ch]);
        for &sample in &mapped[..out_ch] {
            write_sample(sample, format, dst);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESAMPLER
// ═══════════════════════════════════════════════════════════════════════════════

/// Fractional-step reader with stochastic rounding.
///
/// Each output frame reads source frame `floor(position + u)` with `u` drawn
/// uniformly from `[0, 1)`, so non-integral ratios do not produce a periodic
/// drop/repeat pattern. Integral positions are read exactly, which makes a
/// ratio of 1.0 the identity.
pub struct Resampler {
    position: f64,
    rng: StdRng,
}

impl Resampler {
    pub fn new(seed: u64) -> Self {
        Self {
            position: 0.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Drop the fractional carry (after a seek)
    pub fn reset(&mut self) {
        self.position = 0.0;
    }

    /// Fractional source position carried into the next call
    #[inline]
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Read from `src` (interleaved, `channels` wide) into `dst` at step
    /// `|shrink|`. A negative shrink reads `src` from its last frame backwards.
    ///
    /// Returns `(frames_written, source_frames_consumed)`. Stops when `dst`
    /// is full or the source is exhausted; any fractional remainder carries
    /// over to the next call.
    pub fn process(&mut self, src: &[f32], channels: usize, shrink: f64, dst: &mut [f32]) -> (usize, usize) {
        if channels == 0 {
            return (0, 0);
        }
        let available = src.len() / channels;
        let capacity = dst.len() / channels;
        let step = shrink.abs();
        let reverse = shrink < 0.0;
        let mut written = 0;

        while written < capacity {
            let base = self.position.floor();
            if base < 0.0 || base as usize >= available {
                break;
            }
            let dithered = (self.position + self.rng.random::<f64>()).floor() as usize;
            let offset = dithered.min(available - 1);
            let frame = if reverse { available - 1 - offset } else { offset };

            let from = frame * channels;
            let to = written * channels;
            dst[to..to + channels].copy_from_slice(&src[from..from + channels]);

            written += 1;
            self.position += step;
            if step == 0.0 {
                break;
            }
        }

        let consumed = (self.position.floor().max(0.0) as usize).min(available);
        self.position -= consumed as f64;
        (written, consumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_decode_s16le_stereo() {
        let fmt = PcmFormat::s16le(48000, 2);
        let mut bytes = Vec::new();
        for v in [16384i16, -16384, 32767, -32768] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let mut out = Vec::new();
        let frames = decode_into(&bytes, &fmt, fmt.needs_sign_swap(), fmt.needs_endian_swap(), 2, &mut out);
        assert_eq!(frames, 2);
        assert_relative_eq!(out[0], 0.5);
        assert_relative_eq!(out[1], -0.5);
        assert_relative_eq!(out[3], -1.0);
    }

    #[test]
    fn test_decode_unsigned_8bit_mono_to_stereo() {
        let fmt = PcmFormat::new(8000, 1, 8).unwrap();
        let mut out = Vec::new();
        decode_into(&[128, 192, 0], &fmt, true, false, 2, &mut out);
        assert_eq!(out.len(), 6);
        assert_relative_eq!(out[0], 0.0);
        assert_relative_eq!(out[2], 0.5);
        assert_relative_eq!(out[3], 0.5);
        assert_relative_eq!(out[4], -1.0);
    }

    #[test]
    fn test_decode_big_endian_24bit() {
        let fmt = PcmFormat::new(48000, 1, 24).unwrap().with_big_endian(true);
        let mut out = Vec::new();
        // 0x400000 = 0.5, 0xC00000 = -0.5
        decode_into(&[0x40, 0x00, 0x00, 0xC0, 0x00, 0x00], &fmt, false, fmt.needs_endian_swap(), 1, &mut out);
        assert_relative_eq!(out[0], 0.5);
        assert_relative_eq!(out[1], -0.5);
    }

    #[test]
    fn test_downmix_to_mono_averages() {
        let fmt = PcmFormat::s16le(48000, 2);
        let mut bytes = Vec::new();
        for v in [16384i16, 0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let mut out = Vec::new();
        decode_into(&bytes, &fmt, false, fmt.needs_endian_swap(), 1, &mut out);
        assert_eq!(out.len(), 1);
        assert_relative_eq!(out[0], 0.25);
    }

    #[test]
    fn test_partial_frame_ignored() {
        let fmt = PcmFormat::s16le(48000, 2);
        let mut out = Vec::new();
        assert_eq!(decode_into(&[0; 7], &fmt, false, false, 2, &mut out), 1);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_encode_decode_unsigned_be() {
        let fmt = PcmFormat::s16le(22050, 1).with_signed(false).with_big_endian(true);
        let mut bytes = Vec::new();
        encode_into(&[0.5, -0.5, 0.0, 0.0], 2, &fmt, &mut bytes);
        assert_eq!(bytes.len(), 4);

        let mut back = Vec::new();
        decode_into(&bytes, &fmt, true, fmt.needs_endian_swap(), 1, &mut back);
        assert!((back[0] - 0.0).abs() < 1e-4, "stereo (0.5, -0.5) down-mixes to 0");
        assert!((back[1]).abs() < 1e-4);
    }

    #[test]
    fn test_resampler_identity() {
        let src: Vec<f32> = (0..64).map(|i| i as f32).collect();
        let mut dst = vec![0.0; 64];
        let mut rs = Resampler::new(7);
        let (written, consumed) = rs.process(&src, 2, 1.0, &mut dst);
        assert_eq!(written, 32);
        assert_eq!(consumed, 32);
        assert_eq!(dst, src);
    }

    #[test]
    fn test_resampler_reverse() {
        let src: Vec<f32> = (0..4).map(|i| i as f32).collect();
        let mut dst = vec![0.0; 4];
        let mut rs = Resampler::new(1);
        let (written, consumed) = rs.process(&src, 1, -1.0, &mut dst);
        assert_eq!((written, consumed), (4, 4));
        assert_eq!(dst, vec![3.0, 2.0, 1.0, 0.0]);
    }

    #[test]
    fn test_resampler_half_speed_carries_fraction() {
        let src = vec![1.0f32; 10];
        let mut dst = vec![0.0; 8];
        let mut rs = Resampler::new(3);
        let (written, consumed) = rs.process(&src, 1, 0.5, &mut dst);
        assert_eq!(written, 8);
        assert_eq!(consumed, 4);
        assert_relative_eq!(rs.position(), 0.0);

        let (written, consumed) = rs.process(&src[..3], 1, 0.5, &mut dst);
        assert_eq!(written, 6);
        assert_eq!(consumed, 3);
    }

    #[test]
    fn test_resampler_double_speed_reads_in_range() {
        let src: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let mut dst = vec![-1.0; 40];
        let mut rs = Resampler::new(11);
        let (written, consumed) = rs.process(&src, 1, 2.0, &mut dst);
        assert_eq!(written, 40);
        assert_eq!(consumed, 80);
        for (i, &v) in dst.iter().enumerate() {
            assert_eq!(v, (i * 2) as f32, "integral step reads exact frames");
        }
    }
}
