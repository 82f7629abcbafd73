//! DeviceCallbackEngine Integration Tests
//!
//! Tests for:
//! - Identity resampling reproduces the source exactly
//! - Seek alignment, idempotence and position publishing
//! - Reverse playback, forward loop and ping-pong at the selection edges
//! - End of audio, short reads and cache misses play silence
//! - Stale buffers are dropped after a seek without a second silent buffer
//! - Mute keeps consuming audio; clip and master volume scale the output
//! - Live generator and recording tap
//! - Full pipeline: filler thread + virtual device + output driver

use std::sync::Arc;

use approx::assert_relative_eq;
use std::time::{Duration, Instant};

use fl_audio::{
    AudioStreamDescriptor, CacheFiller, CacheFillerEnd, CachePool, CallbackHooks, ClipAudioSource, ClipStore,
    ControlMessage, ControlSender, DEFAULT_FILLER_POLL, DeviceCallbackEngine, EngineState, EngineStatus,
    LiveGenerator, MemoryClipStore, MemorySink, OutputDriver, OutputSpec, PcmFormat, ReconnectPolicy, Recorder,
    VirtualBackend, control_queue, fill,
};
use fl_core::{Direction, FrameBounds, LoopMode};
use parking_lot::Mutex;

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

const RATE: u32 = 8000;
const CLIP: i64 = 7;
const FRAMES_PER_BUFFER: usize = 16;
const CACHE_CAPACITY: usize = 8;

/// Mono 16-bit ramp: frame i holds sample value i
fn ramp(frames: usize) -> Vec<u8> {
    (0..frames).flat_map(|i| (i as i16).to_le_bytes()).collect()
}

/// Recover the ramp index from a decoded sample
fn index_of(sample: f32) -> i64 {
    (sample * 32768.0).round() as i64
}

fn indices(samples: &[f32]) -> Vec<i64> {
    samples.iter().map(|&s| index_of(s)).collect()
}

/// Callback engine whose cache requests are serviced synchronously after
/// every render, so output is deterministic.
struct Rig {
    engine: DeviceCallbackEngine,
    control: ControlSender,
    filler: CacheFillerEnd,
    source: Box<dyn ClipAudioSource>,
    desc: Arc<AudioStreamDescriptor>,
    hooks: Arc<CallbackHooks>,
    status: Arc<EngineStatus>,
}

impl Rig {
    fn new(source_frames: usize, audio_frames: u64) -> Self {
        let format = PcmFormat::s16le(RATE, 1);
        let desc = Arc::new(AudioStreamDescriptor::new(format, RATE, 1, audio_frames * 2));
        let store = MemoryClipStore::new();
        store.insert(CLIP, ramp(source_frames));
        let source = store.open(CLIP).unwrap();

        let (control, receiver) = control_queue(16);
        let (requester, filler) = CachePool::create(CACHE_CAPACITY, FRAMES_PER_BUFFER, &format, 1);
        let hooks = Arc::new(CallbackHooks::new());
        let engine = DeviceCallbackEngine::new(Arc::clone(&desc), receiver, requester, Arc::clone(&hooks));
        let status = engine.status();

        Self {
            engine,
            control,
            filler,
            source,
            desc,
            hooks,
            status,
        }
    }

    fn send(&self, message: ControlMessage) {
        self.control.send(message).unwrap();
    }

    /// Fill every outstanding request
    fn pump(&mut self) {
        let frame_bytes = self.desc.input().frame_bytes();
        let pool = self.filler.shared_pool();
        while let Some(index) = self.filler.next_request() {
            {
                let mut buffer = pool.slot(index).buffer();
                let frames = buffer.byte_size / frame_bytes;
                fill(&mut buffer, self.source.as_mut(), &self.desc, frames);
            }
            self.filler.publish(index);
        }
    }

    fn render(&mut self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames];
        self.engine.process(&mut out, frames);
        self.pump();
        out
    }

    fn render_many(&mut self, chunks: usize, frames: usize) -> Vec<f32> {
        (0..chunks).flat_map(|_| self.render(frames)).collect()
    }

    /// OPEN the clip; the command buffer itself is silent
    fn open(&mut self) {
        self.open_with(&[]);
    }

    /// OPEN followed by `extra` in the same buffer, so the first requests
    /// already start from the final position
    fn open_with(&mut self, extra: &[ControlMessage]) {
        self.send(ControlMessage::open(CLIP));
        for &message in extra {
            self.send(message);
        }
        let out = self.render(16);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    /// Loop over video frames 2..=3 at 80 fps: audio frames 100..300
    fn select_middle(&self, mode: LoopMode) {
        let bounds = FrameBounds::new(2, 3).unwrap();
        self.desc.set_selection(&bounds, 80.0);
        self.desc.set_loop_mode(mode);
        assert_eq!(self.desc.loop_start(), 200);
        assert_eq!(self.desc.seek_end(), 600);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PLAYBACK
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_identity_rate_plays_source_exactly() {
    let mut rig = Rig::new(1000, 1000);
    rig.open();
    let out = rig.render_many(10, 32);
    assert_eq!(indices(&out), (0..320).collect::<Vec<_>>());
    assert_eq!(rig.status.state(), EngineState::Playing);
    assert!(!rig.status.is_silent());
}

#[test]
fn test_seek_position_follows_consumption() {
    let mut rig = Rig::new(1000, 1000);
    rig.open();
    rig.render_many(3, 32);
    assert_eq!(rig.desc.seek_pos(), 96 * 2);
}

#[test]
fn test_seek_is_aligned_and_idempotent() {
    let mut rig = Rig::new(1000, 1000);
    rig.open();

    rig.send(ControlMessage::seek(601));
    rig.render(16);
    assert_eq!(rig.desc.seek_pos(), 600);

    rig.send(ControlMessage::seek(600));
    rig.render(16);
    assert_eq!(rig.desc.seek_pos(), 600);

    let out = rig.render(32);
    assert_eq!(indices(&out), (300..332).collect::<Vec<_>>());
}

#[test]
fn test_seek_adjust_moves_relative() {
    let mut rig = Rig::new(1000, 1000);
    rig.open();
    rig.send(ControlMessage::seek(400));
    rig.send(ControlMessage::seek_adjust(-100));
    rig.render(16);
    assert_eq!(rig.desc.seek_pos(), 300);
}

#[test]
fn test_stale_buffers_dropped_after_seek() {
    let mut rig = Rig::new(1000, 1000);
    rig.open();
    rig.render(32);
    rig.send(ControlMessage::seek(1000));
    let command = rig.render(32);
    assert!(command.iter().all(|&s| s == 0.0));

    // The very next buffer already plays from the new position
    let out = rig.render(32);
    assert_eq!(indices(&out), (500..532).collect::<Vec<_>>());
    assert_eq!(rig.status.cache_misses(), 0);
}

#[test]
fn test_seek_reissues_requests_in_command_buffer() {
    let mut rig = Rig::new(1000, 1000);
    rig.open();
    rig.render(32);
    rig.send(ControlMessage::seek(1200));

    let mut out = vec![0.0; 32];
    rig.engine.process(&mut out, 32);
    let pool = rig.filler.shared_pool();
    let mut offsets = Vec::new();
    while let Some(index) = rig.filler.next_request() {
        offsets.push(pool.slot(index).buffer().seek_offset);
        rig.filler.publish(index);
    }
    assert_eq!(offsets.first(), Some(&1200));
    assert_eq!(offsets.len(), CACHE_CAPACITY);
}

#[test]
fn test_reverse_direction_reads_backwards() {
    let mut rig = Rig::new(1000, 1000);
    rig.open_with(&[
        ControlMessage::seek(400),
        ControlMessage::set_direction(Direction::Reverse),
    ]);

    let out = rig.render(32);
    assert_eq!(indices(&out), (168..200).rev().collect::<Vec<_>>());
    assert_eq!(rig.desc.direction(), Direction::Reverse);
    assert_eq!(rig.desc.seek_pos(), 400 - 64);
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOOPING
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_forward_loop_wraps_to_selection_start() {
    let mut rig = Rig::new(1000, 1000);
    rig.select_middle(LoopMode::Forward);
    rig.open_with(&[ControlMessage::seek(400)]);

    let out = rig.render_many(5, 32);
    let expected: Vec<i64> = (200..300).chain(100..160).collect();
    assert_eq!(indices(&out), expected);
}

#[test]
fn test_pingpong_reflects_at_both_edges() {
    let mut rig = Rig::new(1000, 1000);
    rig.select_middle(LoopMode::PingPong);
    rig.open_with(&[ControlMessage::seek(560)]);

    let out = rig.render_many(8, 32);
    let expected: Vec<i64> = (280..300).chain((100..300).rev()).chain(100..110).collect();
    assert_eq!(indices(&out[..expected.len()]), expected);
    assert_eq!(rig.desc.direction(), Direction::Forward);
}

#[test]
fn test_pingpong_reports_reverse_while_descending() {
    let mut rig = Rig::new(1000, 1000);
    rig.select_middle(LoopMode::PingPong);
    rig.open_with(&[ControlMessage::seek(560)]);
    rig.render_many(2, 32);
    assert_eq!(rig.desc.direction(), Direction::Reverse);
}

// ═══════════════════════════════════════════════════════════════════════════════
// END OF AUDIO / FAULTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_non_looping_audio_exhausts() {
    let mut rig = Rig::new(64, 64);
    rig.open();
    let first = rig.render_many(2, 32);
    assert_eq!(indices(&first), (0..64).collect::<Vec<_>>());
    assert!(rig.status.audio_exhausted());

    let after = rig.render(32);
    assert!(after.iter().all(|&s| s == 0.0));
    assert_eq!(rig.status.discontinuities(), 0);
}

#[test]
fn test_short_read_covers_rest_of_buffer_with_silence() {
    // Store holds 40 frames, descriptor claims 200
    let mut rig = Rig::new(40, 200);
    rig.open();
    rig.render(32);

    let out = rig.render(32);
    assert_eq!(indices(&out[..8]), (32..40).collect::<Vec<_>>());
    assert!(out[8..].iter().all(|&s| s == 0.0));
    assert!(rig.status.discontinuities() >= 1);
    assert!(!rig.status.audio_exhausted());
}

#[test]
fn test_cache_miss_plays_silence() {
    let mut rig = Rig::new(1000, 1000);
    rig.send(ControlMessage::open(CLIP));
    let mut out = vec![1.0f32; 32];
    rig.engine.process(&mut out, 32);
    // Nothing serviced the requests
    rig.engine.process(&mut out, 32);
    assert!(out.iter().all(|&s| s == 0.0));
    assert!(rig.status.is_silent());
    assert!(rig.status.cache_misses() >= 1);
    assert_eq!(rig.status.state(), EngineState::Opening);
}

#[test]
fn test_close_stops_and_silences() {
    let mut rig = Rig::new(1000, 1000);
    rig.open();
    rig.render(32);
    rig.send(ControlMessage::close());
    rig.render(32);
    let out = rig.render(32);
    assert!(out.iter().all(|&s| s == 0.0));
    assert_eq!(rig.status.state(), EngineState::Stopped);
    assert_eq!(rig.desc.playing_clip(), None);
}

#[test]
fn test_pause_holds_position() {
    let mut rig = Rig::new(1000, 1000);
    rig.open();
    rig.render(32);
    rig.send(ControlMessage::pause());
    rig.render_many(3, 32);
    assert_eq!(rig.desc.seek_pos(), 64);

    rig.send(ControlMessage::resume());
    rig.render(16);
    let out = rig.render(32);
    assert_eq!(indices(&out), (32..64).collect::<Vec<_>>());
}

// ═══════════════════════════════════════════════════════════════════════════════
// MUTE / VOLUME
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_mute_keeps_position_moving() {
    let mut rig = Rig::new(1000, 1000);
    rig.open();
    rig.render(32);

    rig.send(ControlMessage::mute(true));
    rig.render(32);
    assert!(rig.status.is_muted());
    let muted = rig.render_many(2, 32);
    assert!(muted.iter().all(|&s| s == 0.0));
    assert!(rig.status.is_silent());
    assert_eq!(rig.desc.seek_pos(), 96 * 2);

    rig.send(ControlMessage::mute(false));
    rig.render(16);
    let out = rig.render(32);
    assert_eq!(indices(&out), (96..128).collect::<Vec<_>>());
    assert!(!rig.status.is_muted());
}

#[test]
fn test_clip_and_master_volume_scale_output() {
    let mut rig = Rig::new(1000, 1000);
    rig.hooks.set_clip_volume(0.5);
    rig.hooks.set_master_volume(0.5);
    rig.open();

    let out = rig.render(32);
    for (i, &sample) in out.iter().enumerate() {
        assert_relative_eq!(sample, 0.25 * i as f32 / 32768.0);
    }
}

#[test]
fn test_master_volume_scales_generator_audio() {
    let mut rig = Rig::new(1000, 1000);
    rig.hooks.set_clip_volume(0.0);
    rig.hooks.set_master_volume(0.5);
    rig.hooks.set_generator(Some(Box::new(Constant(0.8))));
    rig.open();

    let out = rig.render(32);
    assert!(out.iter().all(|&s| s == 0.4));
}

// ═══════════════════════════════════════════════════════════════════════════════
// HOOKS
// ═══════════════════════════════════════════════════════════════════════════════

struct Constant(f32);

impl LiveGenerator for Constant {
    fn pull(&mut self, out: &mut [f32], _frames: usize, _channels: usize) -> bool {
        out.fill(self.0);
        true
    }
}

#[test]
fn test_live_generator_replaces_cache_audio() {
    let mut rig = Rig::new(1000, 1000);
    rig.hooks.set_generator(Some(Box::new(Constant(0.75))));
    rig.open();
    let out = rig.render(32);
    assert!(out.iter().all(|&s| s == 0.75));
    assert_eq!(rig.desc.seek_pos(), 0);

    rig.hooks.set_generator(None);
    let out = rig.render(32);
    assert_eq!(indices(&out), (0..32).collect::<Vec<_>>());
}

#[test]
fn test_recording_tap_captures_device_output() {
    let mut rig = Rig::new(1000, 1000);
    let sink = MemorySink::new();
    let (recorder, tap) = Recorder::start(Box::new(sink.clone()), PcmFormat::s16le(RATE, 1), RATE, 1, 1.0).unwrap();
    rig.hooks.set_recording(Some(tap));

    rig.open();
    rig.render_many(2, 32);
    rig.hooks.set_recording(None);

    let report = recorder.finish().unwrap();
    assert_eq!(report.frames(), 16 + 64);
    let bytes = sink.contents();
    let frame = |i: usize| i16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]]);
    assert_eq!(frame(0), 0);
    assert_eq!(frame(17), 1);
    assert_eq!(frame(16 + 63), 63);
}

// ═══════════════════════════════════════════════════════════════════════════════
// FULL PIPELINE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_filler_thread_and_virtual_device() {
    let format = PcmFormat::s16le(RATE, 1);
    let desc = Arc::new(AudioStreamDescriptor::new(format, RATE, 1, 8000 * 2));
    let store = Arc::new(MemoryClipStore::new());
    store.insert(CLIP, ramp(8000));

    let (control, receiver) = control_queue(16);
    let (requester, end) = CachePool::create(8, 64, &format, 1);
    let engine = DeviceCallbackEngine::new(Arc::clone(&desc), receiver, requester, Arc::new(CallbackHooks::new()));
    let status = engine.status();
    let mut filler = CacheFiller::spawn(end, store, Arc::clone(&desc), DEFAULT_FILLER_POLL).unwrap();

    let device = VirtualBackend::new();
    let spec = OutputSpec {
        channels: 1,
        sample_rate: RATE,
        ..OutputSpec::default()
    };
    let mut driver = OutputDriver::new(device.clone(), spec, Arc::new(Mutex::new(engine)), ReconnectPolicy::default());
    driver.start().unwrap();

    control.send(ControlMessage::open(CLIP)).unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    let out = loop {
        let out = device.render(32, 1);
        if !status.is_silent() {
            break out;
        }
        assert!(Instant::now() < deadline, "audio never arrived");
        std::thread::sleep(Duration::from_millis(1));
    };

    assert_eq!(indices(&out), (0..32).collect::<Vec<_>>());
    assert!(control.is_drained());
    assert_eq!(desc.playing_clip(), Some(CLIP));

    driver.shutdown();
    filler.shutdown();
    assert!(filler.stats().buffers_filled.load(std::sync::atomic::Ordering::Relaxed) >= 1);
}
