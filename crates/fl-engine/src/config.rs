//! Engine settings
//!
//! Loaded from JSON; every field has a default so partial files work.

use std::fs;
use std::path::Path;
use std::time::Duration;

use fl_audio::{OutputSpec, ReconnectPolicy, SampleFormat};
use fl_core::StopPolicy;
use serde::{Deserialize, Serialize};

use crate::{SessionError, SessionResult};

/// Widest channel layout the converters handle
pub const MAX_OUTPUT_CHANNELS: u16 = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Output device name (`None` = host default)
    pub device: Option<String>,
    /// Device sample rate (Hz)
    pub output_rate: u32,
    pub output_channels: u16,
    /// Preferred device buffer size in frames
    pub buffer_frames: Option<u32>,
    /// Cache buffers in the pool (bounds look-ahead and latency)
    pub cache_buffers: usize,
    /// Source frames per cache buffer
    pub frames_per_buffer: usize,
    pub reconnect_attempts: u32,
    pub reconnect_backoff_ms: u64,
    /// How long a seek waits for the previous control message
    pub seek_drain_timeout_ms: u64,
    pub stop_policy: StopPolicy,
    /// Show every frame instead of skipping late ones
    pub no_frame_drop: bool,
    /// Recording ring size in seconds of output
    pub recording_ring_seconds: f64,
    /// Output gain applied to everything played
    pub master_volume: f32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            device: None,
            output_rate: 48000,
            output_channels: 2,
            buffer_frames: None,
            cache_buffers: 8,
            frames_per_buffer: 2048,
            reconnect_attempts: 3,
            reconnect_backoff_ms: 250,
            seek_drain_timeout_ms: 200,
            stop_policy: StopPolicy::OnVideoEnd,
            no_frame_drop: false,
            recording_ring_seconds: 2.0,
            master_volume: 1.0,
        }
    }
}

impl EngineSettings {
    /// Load and validate settings from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> SessionResult<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let settings = Self::from_json(&content)?;
        log::info!("Loaded engine settings from {}", path.as_ref().display());
        Ok(settings)
    }

    pub fn from_json(json: &str) -> SessionResult<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_json(&self) -> SessionResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> SessionResult<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn validate(&self) -> SessionResult<()> {
        if self.output_rate == 0 || self.output_rate > 384_000 {
            return Err(SessionError::Config(format!(
                "output_rate {} out of range",
                self.output_rate
            )));
        }
        if self.output_channels == 0 || self.output_channels > MAX_OUTPUT_CHANNELS {
            return Err(SessionError::Config(format!(
                "output_channels must be 1..={}, got {}",
                MAX_OUTPUT_CHANNELS, self.output_channels
            )));
        }
        if self.cache_buffers < 2 {
            return Err(SessionError::Config("cache_buffers must be at least 2".into()));
        }
        if self.frames_per_buffer == 0 {
            return Err(SessionError::Config("frames_per_buffer must be positive".into()));
        }
        if self.reconnect_attempts == 0 {
            return Err(SessionError::Config("reconnect_attempts must be at least 1".into()));
        }
        if !(self.recording_ring_seconds > 0.0) {
            return Err(SessionError::Config("recording_ring_seconds must be positive".into()));
        }
        if !self.master_volume.is_finite() || self.master_volume < 0.0 {
            return Err(SessionError::Config(format!(
                "master_volume must be >= 0, got {}",
                self.master_volume
            )));
        }
        Ok(())
    }

    pub fn output_spec(&self) -> OutputSpec {
        OutputSpec {
            channels: self.output_channels,
            sample_rate: self.output_rate,
            sample_format: SampleFormat::F32,
            buffer_frames: self.buffer_frames,
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect_attempts,
            backoff: Duration::from_millis(self.reconnect_backoff_ms),
        }
    }

    #[inline]
    pub fn seek_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.seek_drain_timeout_ms)
    }
}
