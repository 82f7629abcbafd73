//! Raw PCM layout descriptions

use serde::{Deserialize, Serialize};

use crate::{AudioError, AudioResult};

/// Layout of raw interleaved PCM bytes in a clip's audio store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PcmFormat {
    pub rate: u32,
    pub channels: u16,
    /// 8, 16, 24 or 32
    pub sample_width_bits: u16,
    pub is_signed: bool,
    pub is_big_endian: bool,
}

impl PcmFormat {
    pub fn new(rate: u32, channels: u16, sample_width_bits: u16) -> AudioResult<Self> {
        let format = Self {
            rate,
            channels,
            sample_width_bits,
            // 8-bit PCM is conventionally unsigned
            is_signed: sample_width_bits != 8,
            is_big_endian: false,
        };
        format.validate()?;
        Ok(format)
    }

    /// Signed 16-bit little-endian
    pub fn s16le(rate: u32, channels: u16) -> Self {
        Self {
            rate,
            channels,
            sample_width_bits: 16,
            is_signed: true,
            is_big_endian: false,
        }
    }

    pub fn with_signed(mut self, is_signed: bool) -> Self {
        self.is_signed = is_signed;
        self
    }

    pub fn with_big_endian(mut self, is_big_endian: bool) -> Self {
        self.is_big_endian = is_big_endian;
        self
    }

    pub fn validate(&self) -> AudioResult<()> {
        if self.rate == 0 || self.channels == 0 {
            return Err(AudioError::UnsupportedFormat(format!(
                "{} channels @ {}Hz",
                self.channels, self.rate
            )));
        }
        match self.sample_width_bits {
            8 | 16 | 24 | 32 => Ok(()),
            bits => Err(AudioError::UnsupportedFormat(format!("{}-bit samples", bits))),
        }
    }

    #[inline]
    pub fn sample_bytes(&self) -> usize {
        (self.sample_width_bits / 8) as usize
    }

    /// Bytes per interleaved frame (`channels × sample_width_bytes`)
    #[inline]
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * self.sample_bytes()
    }

    #[inline]
    pub fn bytes_per_second(&self) -> f64 {
        self.rate as f64 * self.frame_bytes() as f64
    }

    /// Round a byte offset down to a frame boundary
    #[inline]
    pub fn align(&self, offset: i64) -> i64 {
        let fb = self.frame_bytes() as i64;
        if fb == 0 {
            return offset;
        }
        offset.div_euclid(fb) * fb
    }

    /// Sign bit handling needed to reach signed output samples
    #[inline]
    pub fn needs_sign_swap(&self) -> bool {
        !self.is_signed
    }

    /// Byte order differs from the host
    #[inline]
    pub fn needs_endian_swap(&self) -> bool {
        self.sample_width_bits > 8 && self.is_big_endian != cfg!(target_endian = "big")
    }
}
