//! fl-core: Shared timing types and the frame position calculator for FrameLock
//!
//! This crate holds everything on the video side of the sync engine that does
//! not touch an audio device:
//! - `Ticks` and the monotonic tick clocks
//! - Frame bounds, loop mode and stop policy
//! - `PlaybackClock` (signed fps, loop mode, last quantized tick)
//! - `FramePositionCalculator` (next frame, quantized timecode, verdict)

mod bounds;
mod clock;
mod error;
mod position;
mod tick;

pub use bounds::*;
pub use clock::*;
pub use error::*;
pub use position::*;
pub use tick::*;

/// Identifier of a clip known to the clip store
pub type ClipId = i64;

/// Sentinel for "no clip assigned"
pub const NO_CLIP: ClipId = -1;
