//! Audio Stream Descriptor
//!
//! Describes the audio attached to the playing clip: input layout, output
//! device rate/channels, byte extents and the live seek position.
//!
//! The byte positions are atomics. The realtime callback is the only writer
//! of `seek_pos` once playback runs; control code reads it for display and
//! computes new targets, which travel to the callback as SEEK messages.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};

use fl_core::{ClipId, Direction, FrameBounds, LoopMode, NO_CLIP, Ticks};

use crate::PcmFormat;

#[derive(Debug)]
pub struct AudioStreamDescriptor {
    input: PcmFormat,
    output_rate: u32,
    output_channels: u16,
    /// Total aligned length of the clip's audio in bytes
    audio_len: i64,
    seek_pos: AtomicI64,
    seek_end: AtomicI64,
    loop_start: AtomicI64,
    playing_clip: AtomicI64,
    reverse: AtomicBool,
    loop_mode: AtomicU8,
}

impl AudioStreamDescriptor {
    pub fn new(input: PcmFormat, output_rate: u32, output_channels: u16, audio_len: u64) -> Self {
        let audio_len = input.align(audio_len as i64).max(0);
        Self {
            input,
            output_rate,
            output_channels,
            audio_len,
            seek_pos: AtomicI64::new(0),
            seek_end: AtomicI64::new(audio_len),
            loop_start: AtomicI64::new(0),
            playing_clip: AtomicI64::new(NO_CLIP),
            reverse: AtomicBool::new(false),
            loop_mode: AtomicU8::new(loop_mode_to_u8(LoopMode::None)),
        }
    }

    #[inline]
    pub fn input(&self) -> &PcmFormat {
        &self.input
    }

    #[inline]
    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    #[inline]
    pub fn output_channels(&self) -> u16 {
        self.output_channels
    }

    #[inline]
    pub fn audio_len(&self) -> i64 {
        self.audio_len
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SEEK POSITION
    // ═══════════════════════════════════════════════════════════════════════════

    #[inline]
    pub fn seek_pos(&self) -> i64 {
        self.seek_pos.load(Ordering::Acquire)
    }

    /// Store a new seek position, aligned to a frame and clamped to
    /// `[0, seek_end]`. Returns the stored value.
    #[inline]
    pub fn set_seek_pos(&self, offset: i64) -> i64 {
        let offset = self.clamp_offset(offset);
        self.seek_pos.store(offset, Ordering::Release);
        offset
    }

    #[inline]
    pub fn seek_end(&self) -> i64 {
        self.seek_end.load(Ordering::Acquire)
    }

    #[inline]
    pub fn loop_start(&self) -> i64 {
        self.loop_start.load(Ordering::Acquire)
    }

    /// Align down to the frame size and clamp into `[0, seek_end]`
    #[inline]
    pub fn clamp_offset(&self, offset: i64) -> i64 {
        self.input.align(offset).clamp(0, self.seek_end())
    }

    /// Seek position in seconds of source audio
    pub fn seek_seconds(&self) -> f64 {
        self.offset_to_seconds(self.seek_pos())
    }

    #[inline]
    pub fn offset_to_seconds(&self, offset: i64) -> f64 {
        offset as f64 / self.input.bytes_per_second()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // FRAME ↔ BYTE MAPPING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Unclamped, aligned byte offset where video frame `frame` starts
    fn raw_frame_offset(&self, frame: i64, fps: f64) -> i64 {
        let fps = fps.abs();
        if fps == 0.0 || !fps.is_finite() {
            return 0;
        }
        let sample = ((frame - 1) as f64 / fps * self.input.rate as f64) as i64;
        sample * self.input.frame_bytes() as i64
    }

    /// Byte offset of video frame `frame` at clip rate `fps`, clamped to
    /// `[0, seek_end]`
    pub fn frame_to_offset(&self, frame: i64, fps: f64) -> i64 {
        self.clamp_offset(self.raw_frame_offset(frame, fps))
    }

    /// Signed byte distance covered by `ticks` of source audio, aligned
    pub fn ticks_to_bytes(&self, ticks: Ticks) -> i64 {
        let bytes = (ticks.to_seconds() * self.input.rate as f64) as i64 * self.input.frame_bytes() as i64;
        self.input.align(bytes)
    }

    /// Restrict looping to the audio under `bounds`: from the start of
    /// `first_frame` to the end of `last_frame` (`last_frame / fps`).
    ///
    /// A selection covering the whole clip reproduces the full extent.
    pub fn set_selection(&self, bounds: &FrameBounds, fps: f64) {
        let end = self
            .raw_frame_offset(bounds.last_frame + 1, fps)
            .clamp(0, self.audio_len);
        let start = self.raw_frame_offset(bounds.first_frame, fps).clamp(0, end);
        self.seek_end.store(end, Ordering::Release);
        self.loop_start.store(start, Ordering::Release);
    }

    /// Loop over the whole clip again
    pub fn clear_selection(&self) {
        self.seek_end.store(self.audio_len, Ordering::Release);
        self.loop_start.store(0, Ordering::Release);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CLIP / DIRECTION
    // ═══════════════════════════════════════════════════════════════════════════

    #[inline]
    pub fn playing_clip(&self) -> Option<ClipId> {
        match self.playing_clip.load(Ordering::Acquire) {
            NO_CLIP => None,
            id => Some(id),
        }
    }

    pub fn set_playing_clip(&self, clip: Option<ClipId>) {
        self.playing_clip.store(clip.unwrap_or(NO_CLIP), Ordering::Release);
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        if self.reverse.load(Ordering::Acquire) {
            Direction::Reverse
        } else {
            Direction::Forward
        }
    }

    pub fn set_direction(&self, direction: Direction) {
        self.reverse.store(direction == Direction::Reverse, Ordering::Release);
    }

    #[inline]
    pub fn loop_mode(&self) -> LoopMode {
        match self.loop_mode.load(Ordering::Acquire) {
            1 => LoopMode::Forward,
            2 => LoopMode::PingPong,
            _ => LoopMode::None,
        }
    }

    pub fn set_loop_mode(&self, mode: LoopMode) {
        self.loop_mode.store(loop_mode_to_u8(mode), Ordering::Release);
    }

    /// Signed input/output rate ratio for `direction`
    #[inline]
    pub fn shrink_factor(&self, direction: Direction) -> f64 {
        let magnitude = self.input.rate as f64 / self.output_rate.max(1) as f64;
        magnitude * direction.signum() as f64
    }
}

#[inline]
fn loop_mode_to_u8(mode: LoopMode) -> u8 {
    match mode {
        LoopMode::None => 0,
        LoopMode::Forward => 1,
        LoopMode::PingPong => 2,
    }
}
