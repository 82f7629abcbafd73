//! fl-audio: clip audio streaming for synchronized playback
//!
//! Decodes a clip's raw PCM ahead of time on a filler thread and plays it
//! from a realtime device callback that follows seek / direction / loop
//! commands from the control thread.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  ControlMessage   ┌────────────────────────┐     ┌──────────────┐
//! │ control side │──────(rtrb)──────▶│ DeviceCallbackEngine   │────▶│ AudioBackend │
//! │ (fl-engine)  │                   │ - resample + seek_pos  │     │ cpal/virtual │
//! └──────────────┘                   │ - request planning     │     └──────────────┘
//!                                    └───┬────────────▲───────┘
//!                          request ring  │            │ ready ring
//!                                    ┌───▼────────────┴───────┐
//!                                    │ CacheFiller thread     │
//!                                    │ ClipStore → decode     │
//!                                    └────────────────────────┘
//! ```

mod backend;
mod cache;
mod callback;
mod control;
mod convert;
mod descriptor;
mod device;
mod error;
mod filler;
mod format;
mod recording;
mod source;
mod stream;
mod virtual_device;

pub use backend::*;
pub use cache::*;
pub use callback::*;
pub use control::*;
pub use convert::*;
pub use descriptor::*;
pub use device::*;
pub use error::*;
pub use filler::*;
pub use format::*;
pub use recording::*;
pub use source::*;
pub use stream::*;
pub use virtual_device::*;
