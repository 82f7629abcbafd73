//! Frame ranges and playback policies

use serde::{Deserialize, Serialize};

use crate::{SyncError, SyncResult};

/// How playback behaves when it reaches the end of the active range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    /// Stop at the boundary
    None,
    /// Jump back to the opposite boundary
    Forward,
    /// Reverse direction at each boundary
    PingPong,
}

impl Default for LoopMode {
    fn default() -> Self {
        Self::None
    }
}

impl std::str::FromStr for LoopMode {
    type Err = SyncError;

    fn from_str(s: &str) -> SyncResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "forward" | "loop" => Ok(Self::Forward),
            "pingpong" | "ping_pong" | "ping-pong" => Ok(Self::PingPong),
            other => Err(SyncError::InvalidParam(format!("unknown loop mode '{}'", other))),
        }
    }
}

/// Which track ending halts playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopPolicy {
    OnVideoEnd,
    OnAudioEnd,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self::OnVideoEnd
    }
}

/// Inclusive frame range: the whole clip or the active selection.
///
/// Frames are numbered from 1. A range with `last_frame < first_frame`
/// is empty (clip without frames).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameBounds {
    pub first_frame: i64,
    pub last_frame: i64,
}

impl FrameBounds {
    /// Validated constructor; `first_frame > last_frame + 1` is rejected
    pub fn new(first_frame: i64, last_frame: i64) -> SyncResult<Self> {
        if first_frame > last_frame + 1 {
            return Err(SyncError::InvalidBounds {
                first: first_frame,
                last: last_frame,
            });
        }
        Ok(Self {
            first_frame,
            last_frame,
        })
    }

    /// Bounds of a whole clip with `frames` frames
    pub fn whole_clip(frames: i64) -> Self {
        Self {
            first_frame: 1,
            last_frame: frames.max(0),
        }
    }

    #[inline]
    pub fn len(&self) -> i64 {
        (self.last_frame - self.first_frame + 1).max(0)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn contains(&self, frame: i64) -> bool {
        frame >= self.first_frame && frame <= self.last_frame
    }

    #[inline]
    pub fn clamp(&self, frame: i64) -> i64 {
        if self.is_empty() {
            return self.first_frame;
        }
        frame.clamp(self.first_frame, self.last_frame)
    }
}
