//! Error types for FrameLock core

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid frame rate: {0}")]
    InvalidFps(f64),

    #[error("Invalid frame bounds: first {first} > last {last}")]
    InvalidBounds { first: i64, last: i64 },

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),
}

/// Result type alias
pub type SyncResult<T> = Result<T, SyncError>;
