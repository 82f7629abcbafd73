//! fl-engine: playback sessions for FrameLock
//!
//! Ties the video-side calculator (`fl-core`) to the audio pipeline
//! (`fl-audio`):
//! - `EngineSettings`: JSON-loadable configuration
//! - `ResyncController`: posts seeks / direction changes with a bounded
//!   drain wait and forced reconnect on timeout
//! - `PlaybackSession`: per-tick frame stepping, loop restarts, transport,
//!   recording and the end-of-session report

mod config;
mod error;
mod resync;
mod session;

pub use config::*;
pub use error::*;
pub use resync::*;
pub use session::*;
