//! Session error types

use fl_audio::AudioError;
use fl_core::SyncError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Volume must be a finite value >= 0, got {0}")]
    InvalidVolume(f32),

    #[error("A recording is already running")]
    RecordingActive,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// The output device is gone for this session
    pub fn is_backend_failure(&self) -> bool {
        match self {
            Self::Audio(e) => e.is_fatal() || matches!(e, AudioError::SeekTimeout(_)),
            _ => false,
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
