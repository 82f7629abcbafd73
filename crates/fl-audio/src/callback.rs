//! Realtime device callback
//!
//! `DeviceCallbackEngine::process` is invoked once per device buffer. Per call:
//!
//! 1. Drain control messages in order. Any message processed → the whole
//!    buffer is silence.
//! 2. Paused / closed / stopped → silence.
//! 3. A live generator, when attached and producing, fills the buffer.
//! 4. Otherwise resample from the current cache buffer(s) at clip volume,
//!    publishing the advancing seek position. A cache miss plays silence.
//! 5. Muted → zero the buffer (the seek position has still advanced).
//!    Otherwise apply master volume.
//! 6. Fork the output to the recording tap, if any.
//! 7. Top up cache requests, resolving loop boundaries.
//!
//! No allocation, no blocking locks, no I/O, no logging. Rare events are
//! counted in `EngineStatus` for the control thread to report.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use fl_core::{ClipId, Direction, LoopMode};
use parking_lot::Mutex;
use portable_atomic::AtomicF32;

use crate::AudioStreamDescriptor;
use crate::cache::CacheRequester;
use crate::control::{ControlCommand, ControlMessage, ControlReceiver};
use crate::convert::Resampler;
use crate::recording::RecordingTap;
use crate::source::LiveGenerator;

// ═══════════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    /// No clip opened yet
    Closed = 0,
    /// Clip opened, waiting for the first buffer
    Opening = 1,
    Playing = 2,
    Paused = 3,
    /// Closed after playing; reopen with OPEN
    Stopped = 4,
}

impl From<u8> for EngineState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Opening,
            2 => Self::Playing,
            3 => Self::Paused,
            4 => Self::Stopped,
            _ => Self::Closed,
        }
    }
}

impl EngineState {
    /// States in which the callback renders audio
    #[inline]
    pub fn is_rendering(self) -> bool {
        matches!(self, Self::Opening | Self::Playing)
    }
}

/// Callback-side status readable from any thread
#[derive(Debug)]
pub struct EngineStatus {
    state: AtomicU8,
    frames_written: AtomicU64,
    is_silent: AtomicBool,
    muted: AtomicBool,
    audio_exhausted: AtomicBool,
    discontinuities: AtomicU64,
    cache_misses: AtomicU64,
    callbacks: AtomicU64,
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(EngineState::Closed as u8),
            frames_written: AtomicU64::new(0),
            is_silent: AtomicBool::new(true),
            muted: AtomicBool::new(false),
            audio_exhausted: AtomicBool::new(false),
            discontinuities: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            callbacks: AtomicU64::new(0),
        }
    }
}

impl EngineStatus {
    #[inline]
    pub fn state(&self) -> EngineState {
        EngineState::from(self.state.load(Ordering::Acquire))
    }

    #[inline]
    fn set_state(&self, state: EngineState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Frames handed to the device since start
    #[inline]
    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    /// Last buffer was silent (nothing rendered, or muted)
    #[inline]
    pub fn is_silent(&self) -> bool {
        self.is_silent.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    /// The final segment of non-looping audio has been played
    #[inline]
    pub fn audio_exhausted(&self) -> bool {
        self.audio_exhausted.load(Ordering::Acquire)
    }

    /// Short reads that were covered with silence
    #[inline]
    pub fn discontinuities(&self) -> u64 {
        self.discontinuities.load(Ordering::Relaxed)
    }

    /// Buffers rendered (partly) silent because nothing was ready
    #[inline]
    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn callbacks(&self) -> u64 {
        self.callbacks.load(Ordering::Relaxed)
    }
}

/// Optional per-buffer participants and output gains, set from the control
/// thread
pub struct CallbackHooks {
    generator: Mutex<Option<Box<dyn LiveGenerator>>>,
    recording: Mutex<Option<RecordingTap>>,
    /// Applied to everything the device plays
    master_volume: AtomicF32,
    /// Applied to clip audio only
    clip_volume: AtomicF32,
}

impl Default for CallbackHooks {
    fn default() -> Self {
        Self {
            generator: Mutex::new(None),
            recording: Mutex::new(None),
            master_volume: AtomicF32::new(1.0),
            clip_volume: AtomicF32::new(1.0),
        }
    }
}

impl CallbackHooks {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn master_volume(&self) -> f32 {
        self.master_volume.load(Ordering::Relaxed)
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.master_volume.store(volume, Ordering::Relaxed);
    }

    #[inline]
    pub fn clip_volume(&self) -> f32 {
        self.clip_volume.load(Ordering::Relaxed)
    }

    pub fn set_clip_volume(&self, volume: f32) {
        self.clip_volume.store(volume, Ordering::Relaxed);
    }

    /// Replace the live generator; returns the previous one
    pub fn set_generator(&self, generator: Option<Box<dyn LiveGenerator>>) -> Option<Box<dyn LiveGenerator>> {
        std::mem::replace(&mut *self.generator.lock(), generator)
    }

    /// Replace the recording tap; returns the previous one
    pub fn set_recording(&self, tap: Option<RecordingTap>) -> Option<RecordingTap> {
        std::mem::replace(&mut *self.recording.lock(), tap)
    }

    pub fn has_generator(&self) -> bool {
        self.generator.lock().is_some()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Buffer currently being played
#[derive(Debug, Clone, Copy)]
struct Playhead {
    index: usize,
    /// Payload frames consumed
    cursor: usize,
    frames: usize,
    shrink: f64,
    seek_offset: i64,
    eof: bool,
    final_segment: bool,
}

impl Playhead {
    #[inline]
    fn is_reverse(&self) -> bool {
        self.shrink < 0.0
    }
}

pub struct DeviceCallbackEngine {
    descriptor: Arc<AudioStreamDescriptor>,
    status: Arc<EngineStatus>,
    hooks: Arc<CallbackHooks>,
    control: ControlReceiver,
    cache: CacheRequester,
    resampler: Resampler,
    channels: usize,
    frame_bytes: i64,

    clip: Option<ClipId>,
    /// Bumped whenever outstanding requests become stale
    epoch: u32,
    current: Option<Playhead>,
    /// Where the next request starts and which way it reads
    request_pos: i64,
    request_dir: Direction,
    /// No further requests until the next OPEN / SEEK
    end_planned: bool,
}

impl DeviceCallbackEngine {
    pub fn new(
        descriptor: Arc<AudioStreamDescriptor>,
        control: ControlReceiver,
        cache: CacheRequester,
        hooks: Arc<CallbackHooks>,
    ) -> Self {
        let channels = descriptor.output_channels().max(1) as usize;
        let frame_bytes = descriptor.input().frame_bytes().max(1) as i64;
        Self {
            descriptor,
            status: Arc::new(EngineStatus::default()),
            hooks,
            control,
            cache,
            resampler: Resampler::new(0x666c_6f63_6b),
            channels,
            frame_bytes,
            clip: None,
            epoch: 0,
            current: None,
            request_pos: 0,
            request_dir: Direction::Forward,
            end_planned: true,
        }
    }

    pub fn status(&self) -> Arc<EngineStatus> {
        Arc::clone(&self.status)
    }

    pub fn descriptor(&self) -> &Arc<AudioStreamDescriptor> {
        &self.descriptor
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Render `frames` interleaved frames into `out`
    pub fn process(&mut self, out: &mut [f32], frames: usize) {
        let frames = frames.min(out.len() / self.channels);
        let (out, tail) = out.split_at_mut(frames * self.channels);
        tail.fill(0.0);
        self.status.callbacks.fetch_add(1, Ordering::Relaxed);

        let handled = self.apply_control();
        let state = self.status.state();

        let produced = if handled > 0 || !state.is_rendering() {
            0
        } else if self.pull_generator(out, frames) {
            frames
        } else {
            let produced = self.render_from_cache(out, frames);
            if produced < frames && !self.status.audio_exhausted() {
                self.status.cache_misses.fetch_add(1, Ordering::Relaxed);
            }
            apply_gain(&mut out[..produced * self.channels], self.hooks.clip_volume());
            produced
        };

        out[produced * self.channels..].fill(0.0);
        let muted = self.status.is_muted();
        if muted {
            out.fill(0.0);
        } else {
            apply_gain(&mut out[..produced * self.channels], self.hooks.master_volume());
        }
        self.status.is_silent.store(produced == 0 || muted, Ordering::Relaxed);
        self.status.frames_written.fetch_add(frames as u64, Ordering::Relaxed);

        if let Some(mut recording) = self.hooks.recording.try_lock() {
            if let Some(tap) = recording.as_mut() {
                tap.push(out);
            }
        }

        self.plan_requests();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CONTROL
    // ═══════════════════════════════════════════════════════════════════════════

    fn apply_control(&mut self) -> usize {
        let mut handled = 0;
        while let Some(message) = self.control.try_recv() {
            self.apply(message);
            self.control.ack();
            handled += 1;
        }
        handled
    }

    fn apply(&mut self, message: ControlMessage) {
        match message.command {
            ControlCommand::Open => {
                self.clip = Some(message.arg);
                self.descriptor.set_playing_clip(Some(message.arg));
                let start = self.descriptor.set_seek_pos(0);
                self.restart(start);
                self.status.set_state(EngineState::Opening);
            }
            ControlCommand::Seek => {
                let target = self.descriptor.set_seek_pos(message.arg);
                self.restart(target);
            }
            ControlCommand::SeekAdjust => {
                let target = self
                    .descriptor
                    .set_seek_pos(self.descriptor.seek_pos().saturating_add(message.arg));
                self.restart(target);
            }
            ControlCommand::SetDirection => {
                let direction = if message.arg < 0 { Direction::Reverse } else { Direction::Forward };
                self.descriptor.set_direction(direction);
                self.restart(self.descriptor.seek_pos());
            }
            ControlCommand::Pause => {
                if self.status.state().is_rendering() {
                    self.status.set_state(EngineState::Paused);
                }
            }
            ControlCommand::Resume => {
                if self.status.state() == EngineState::Paused {
                    self.status.set_state(EngineState::Playing);
                }
            }
            ControlCommand::Mute => self.status.muted.store(true, Ordering::Release),
            ControlCommand::Unmute => self.status.muted.store(false, Ordering::Release),
            ControlCommand::Close => {
                self.discard_current();
                self.epoch = self.epoch.wrapping_add(1);
                self.clip = None;
                self.end_planned = true;
                self.descriptor.set_playing_clip(None);
                self.status.set_state(EngineState::Stopped);
            }
        }
    }

    /// Drop what is playing and queued, and plan from `offset`
    fn restart(&mut self, offset: i64) {
        self.discard_current();
        self.epoch = self.epoch.wrapping_add(1);
        // Everything already filled is stale; free the slots for this buffer's requests
        while let Some(index) = self.cache.take_ready() {
            self.cache.release(index);
        }
        self.resampler.reset();
        self.request_pos = offset;
        self.request_dir = self.descriptor.direction();
        self.end_planned = self.clip.is_none();
        self.status.audio_exhausted.store(false, Ordering::Release);
    }

    fn discard_current(&mut self) {
        if let Some(head) = self.current.take() {
            self.cache.release(head.index);
        }
    }

    fn mark_exhausted(&mut self) {
        self.end_planned = true;
        self.status.audio_exhausted.store(true, Ordering::Release);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RENDER
    // ═══════════════════════════════════════════════════════════════════════════

    fn pull_generator(&mut self, out: &mut [f32], frames: usize) -> bool {
        match self.hooks.generator.try_lock() {
            Some(mut generator) => match generator.as_mut() {
                Some(generator) => generator.pull(out, frames, self.channels),
                None => false,
            },
            None => false,
        }
    }

    /// Returns frames written
    fn render_from_cache(&mut self, out: &mut [f32], frames: usize) -> usize {
        let channels = self.channels;
        let mut written = 0;

        while written < frames {
            if self.current.is_none() {
                self.current = self.next_buffer();
            }
            let Some(mut head) = self.current else {
                break;
            };

            let step = match self.cache.slot(head.index).try_buffer() {
                Some(buffer) => {
                    let remaining = head.frames - head.cursor;
                    let src = if head.is_reverse() {
                        &buffer.payload[..remaining * channels]
                    } else {
                        &buffer.payload[head.cursor * channels..head.frames * channels]
                    };
                    Some(self.resampler.process(
                        src,
                        channels,
                        head.shrink,
                        &mut out[written * channels..frames * channels],
                    ))
                }
                None => None,
            };
            let Some((count, consumed)) = step else {
                break;
            };

            written += count;
            head.cursor += consumed;
            let moved = head.cursor as i64 * self.frame_bytes;
            let position = if head.is_reverse() {
                head.seek_offset - moved
            } else {
                head.seek_offset + moved
            };
            self.descriptor.set_seek_pos(position);

            if head.cursor >= head.frames {
                self.cache.release(head.index);
                self.current = None;
                if head.final_segment {
                    self.mark_exhausted();
                    break;
                }
                if head.eof {
                    // Rest of this device buffer stays silent
                    self.status.discontinuities.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            } else {
                self.current = Some(head);
                if count == 0 {
                    break;
                }
            }
        }
        written
    }

    /// Take the next ready buffer of the current epoch
    fn next_buffer(&mut self) -> Option<Playhead> {
        while let Some(index) = self.cache.take_ready() {
            let epoch = self.epoch;
            let head = self
                .cache
                .slot(index)
                .try_buffer()
                .filter(|buffer| buffer.epoch == epoch)
                .map(|buffer| Playhead {
                    index,
                    cursor: 0,
                    frames: buffer.sample_count,
                    shrink: buffer.shrink_factor,
                    seek_offset: buffer.seek_offset,
                    eof: buffer.eof,
                    final_segment: buffer.final_segment,
                });
            let Some(head) = head else {
                self.cache.release(index);
                continue;
            };

            if self.status.state() == EngineState::Opening {
                self.status.set_state(EngineState::Playing);
            }

            if head.frames == 0 {
                self.cache.release(index);
                if head.final_segment {
                    self.mark_exhausted();
                    return None;
                }
                if head.eof {
                    self.status.discontinuities.fetch_add(1, Ordering::Relaxed);
                }
                continue;
            }

            self.descriptor.set_direction(Direction::of(head.shrink));
            return Some(head);
        }

        if self.end_planned && self.clip.is_some() && self.cache.outstanding() == 0 {
            self.mark_exhausted();
        }
        None
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // REQUESTS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Issue requests into every free slot
    fn plan_requests(&mut self) {
        let Some(clip) = self.clip else {
            return;
        };
        if self.end_planned {
            return;
        }
        let chunk = self.cache.pool().frames_per_buffer() as i64 * self.frame_bytes;
        let loop_mode = self.descriptor.loop_mode();
        let loop_start = self.descriptor.loop_start();
        let seek_end = self.descriptor.seek_end();

        while let Some(index) = self.cache.free_slot() {
            if !self.resolve_boundary(loop_mode, loop_start, seek_end) {
                self.cache.return_slot(index);
                self.end_planned = true;
                return;
            }

            let forward = self.request_dir == Direction::Forward;
            let room = if forward {
                seek_end - self.request_pos
            } else {
                self.request_pos - loop_start
            };
            let len = room.min(chunk);
            let last = loop_mode == LoopMode::None && len == room;
            let shrink = self.descriptor.shrink_factor(self.request_dir);

            let described = match self.cache.slot(index).try_buffer() {
                Some(mut buffer) => {
                    buffer.clip_id = clip;
                    buffer.seek_offset = self.request_pos;
                    buffer.byte_size = len as usize;
                    buffer.shrink_factor = shrink;
                    buffer.epoch = self.epoch;
                    buffer.final_segment = last;
                    buffer.eof = false;
                    buffer.sample_count = 0;
                    true
                }
                None => false,
            };
            if !described {
                self.cache.return_slot(index);
                return;
            }
            if !self.cache.issue(index) {
                return;
            }

            self.request_pos += if forward { len } else { -len };
            if last {
                self.end_planned = true;
                return;
            }
        }
    }

    /// Move the request cursor off a loop edge. Returns `false` when no more
    /// audio should be requested.
    fn resolve_boundary(&mut self, loop_mode: LoopMode, loop_start: i64, seek_end: i64) -> bool {
        // Two passes: a ping-pong flip or forward wrap may land on the other edge
        for _ in 0..2 {
            let at_edge = match self.request_dir {
                Direction::Forward => self.request_pos >= seek_end,
                Direction::Reverse => self.request_pos <= loop_start,
            };
            if !at_edge {
                return true;
            }
            match loop_mode {
                LoopMode::None => return false,
                LoopMode::Forward => {
                    self.request_pos = match self.request_dir {
                        Direction::Forward => loop_start,
                        Direction::Reverse => seek_end,
                    };
                }
                LoopMode::PingPong => self.request_dir = self.request_dir.flipped(),
            }
        }
        false
    }
}

#[inline]
fn apply_gain(samples: &mut [f32], gain: f32) {
    if gain != 1.0 {
        samples.iter_mut().for_each(|s| *s *= gain);
    }
}
