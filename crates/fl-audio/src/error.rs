//! Audio error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No audio device found")]
    NoDevice,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device cannot supply {channels} channels @ {sample_rate}Hz ({detail})")]
    FormatMismatch {
        channels: u16,
        sample_rate: u32,
        detail: String,
    },

    #[error("Failed to build stream: {0}")]
    StreamBuildError(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Audio player unusable after {attempts} reconnect attempts; select another device")]
    BackendUnusable { attempts: u32 },

    #[error("Control queue did not drain within {0:?}")]
    SeekTimeout(std::time::Duration),

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("Recording is corrupt: {0}")]
    RecordingCorrupt(String),

    #[error("No clip is open")]
    NoClip,

    #[error("Failed to spawn {0} thread: {1}")]
    Thread(&'static str, std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AudioError {
    /// Conditions that must never be retried silently
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::FormatMismatch { .. } | Self::BackendUnusable { .. } | Self::UnsupportedFormat(_)
        )
    }
}

pub type AudioResult<T> = Result<T, AudioError>;
