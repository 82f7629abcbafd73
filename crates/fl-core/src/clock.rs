//! Playback clock owned by a playback session

use serde::{Deserialize, Serialize};

use crate::{LoopMode, SyncError, SyncResult, Ticks};

/// Playback direction derived from the sign of fps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    #[inline]
    pub fn of(fps: f64) -> Self {
        if fps < 0.0 { Self::Reverse } else { Self::Forward }
    }

    #[inline]
    pub fn signum(self) -> i64 {
        match self {
            Self::Forward => 1,
            Self::Reverse => -1,
        }
    }

    #[inline]
    pub fn flipped(self) -> Self {
        match self {
            Self::Forward => Self::Reverse,
            Self::Reverse => Self::Forward,
        }
    }
}

/// Video-side clock state.
///
/// `fps` is signed: negative plays in reverse. `last_tick` is the quantized
/// timecode of the frame currently on screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackClock {
    pub origin_ticks: Ticks,
    pub fps: f64,
    pub loop_mode: LoopMode,
    pub last_tick: Ticks,
}

impl PlaybackClock {
    pub fn new(origin_ticks: Ticks, fps: f64, loop_mode: LoopMode) -> SyncResult<Self> {
        if !fps.is_finite() {
            return Err(SyncError::InvalidFps(fps));
        }
        Ok(Self {
            origin_ticks,
            fps,
            loop_mode,
            last_tick: origin_ticks,
        })
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        Direction::of(self.fps)
    }

    /// Reverse playback direction, keeping the speed
    pub fn flip_direction(&mut self) {
        self.fps = -self.fps;
    }

    pub fn set_fps(&mut self, fps: f64) -> SyncResult<()> {
        if !fps.is_finite() {
            return Err(SyncError::InvalidFps(fps));
        }
        self.fps = fps;
        Ok(())
    }

    /// Ticks elapsed since the clock was started, at the last displayed frame
    #[inline]
    pub fn elapsed(&self) -> Ticks {
        self.last_tick - self.origin_ticks
    }

    /// Restart timing from `now` (after a pause or external jump)
    pub fn rebase(&mut self, now: Ticks) {
        self.last_tick = now;
    }
}
