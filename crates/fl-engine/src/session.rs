//! Playback session
//!
//! One `PlaybackSession` owns everything a playing clip needs:
//! - the video clock and frame position calculator
//! - the audio stream descriptor shared with the callback and filler
//! - the cache filler thread
//! - the output driver (device stream, reconnects)
//! - the resync controller that keeps audio on the video frame
//!
//! The display loop calls `tick()` once per video tick and shows the
//! returned frame unless the verdict is a stop.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use fl_audio::{
    AudioBackend, AudioStreamDescriptor, CacheFiller, CachePool, CallbackHooks, ClipStore, DEFAULT_CONTROL_CAPACITY,
    DEFAULT_FILLER_POLL, DeviceCallbackEngine, EngineState, EngineStatus, LiveGenerator, OutputDriver, PcmFormat,
    Recorder, RecordingReport, RecordingSink, SharedRenderer, control_queue,
};
use fl_core::{
    ClipId, Direction, FrameBounds, FramePositionCalculator, FrameStep, LoopMode, PlaybackClock, SyncError, TickClock,
    TickSource, Ticks, Verdict,
};
use parking_lot::Mutex;
use portable_atomic::AtomicF64;
use serde::{Deserialize, Serialize};

use crate::resync::ResyncController;
use crate::{EngineSettings, SessionError, SessionResult};

/// Why playback ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    User,
    VideoEnd,
    AudioEnd,
    BackendFailure,
}

impl StopReason {
    fn from_verdict(verdict: Verdict) -> Option<Self> {
        match verdict {
            Verdict::Continue => None,
            Verdict::Stop | Verdict::StopVideo => Some(Self::VideoEnd),
            Verdict::StopAudio => Some(Self::AudioEnd),
        }
    }
}

/// The clip a session plays
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipInfo {
    pub clip: ClipId,
    /// Layout of the clip's raw audio
    pub audio: PcmFormat,
    /// Audio length in bytes
    pub audio_len: u64,
    /// Signed frame rate; negative starts in reverse from the last frame
    pub fps: f64,
    pub frames: i64,
    pub loop_mode: LoopMode,
}

/// Summary handed back by `PlaybackSession::finish`
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub stop_reason: StopReason,
    pub final_frame: i64,
    pub frames_written: u64,
    pub discontinuities: u64,
    pub cache_misses: u64,
    pub reconnects: u32,
    pub loop_restarts: u64,
    pub recording: Option<RecordingReport>,
    /// Set when the recording cannot be trusted
    pub recording_error: Option<String>,
}

/// Callback counters already written to the log
#[derive(Default)]
struct Reported {
    state: Option<EngineState>,
    discontinuities: u64,
    cache_misses: u64,
    recording_corrupt: bool,
}

pub struct PlaybackSession<B: AudioBackend> {
    settings: EngineSettings,
    info: ClipInfo,
    calculator: FramePositionCalculator,
    clock: PlaybackClock,
    clip_bounds: FrameBounds,
    selection: Option<FrameBounds>,
    frame: i64,
    ticks: Arc<dyn TickSource>,
    descriptor: Arc<AudioStreamDescriptor>,
    resync: ResyncController,
    driver: OutputDriver<B>,
    filler: CacheFiller,
    hooks: Arc<CallbackHooks>,
    status: Arc<EngineStatus>,
    recorder: Option<Recorder>,
    /// Signed fps for UI readers
    fps: Arc<AtomicF64>,
    stop: Option<StopReason>,
    paused: bool,
    loop_restarts: u64,
    reported: Reported,
}

impl<B: AudioBackend> PlaybackSession<B> {
    /// Start playing `info` on `backend`, timed by the wall clock
    pub fn start(
        settings: EngineSettings,
        backend: B,
        store: Arc<dyn ClipStore>,
        info: ClipInfo,
    ) -> SessionResult<Self> {
        Self::start_with_ticks(settings, backend, store, info, Arc::new(TickClock::new()))
    }

    pub fn start_with_ticks(
        settings: EngineSettings,
        backend: B,
        store: Arc<dyn ClipStore>,
        info: ClipInfo,
        ticks: Arc<dyn TickSource>,
    ) -> SessionResult<Self> {
        settings.validate()?;
        info.audio.validate()?;
        if info.fps == 0.0 {
            return Err(SyncError::InvalidFps(info.fps).into());
        }
        let clock = PlaybackClock::new(ticks.now(), info.fps, info.loop_mode)?;
        let clip_bounds = FrameBounds::whole_clip(info.frames);
        let direction = Direction::of(info.fps);

        let descriptor = Arc::new(AudioStreamDescriptor::new(
            info.audio,
            settings.output_rate,
            settings.output_channels,
            info.audio_len,
        ));
        descriptor.set_loop_mode(info.loop_mode);
        descriptor.set_direction(direction);

        let (control, receiver) = control_queue(DEFAULT_CONTROL_CAPACITY);
        let (requester, filler_end) = CachePool::create(
            settings.cache_buffers,
            settings.frames_per_buffer,
            &info.audio,
            settings.output_channels,
        );
        let hooks = Arc::new(CallbackHooks::new());
        hooks.set_master_volume(settings.master_volume);
        let engine = DeviceCallbackEngine::new(Arc::clone(&descriptor), receiver, requester, Arc::clone(&hooks));
        let status = engine.status();
        let renderer: SharedRenderer = Arc::new(Mutex::new(engine));

        let filler = CacheFiller::spawn(filler_end, store, Arc::clone(&descriptor), DEFAULT_FILLER_POLL)?;
        let mut driver = OutputDriver::new(backend, settings.output_spec(), renderer, settings.reconnect_policy());
        driver.start()?;

        let mut resync = ResyncController::new(
            Arc::clone(&descriptor),
            control,
            info.fps,
            settings.seek_drain_timeout(),
        );
        let (frame, offset) = match direction {
            Direction::Forward => (
                clip_bounds.first_frame,
                descriptor.frame_to_offset(clip_bounds.first_frame, info.fps),
            ),
            Direction::Reverse => (clip_bounds.last_frame, descriptor.seek_end()),
        };
        resync.open(info.clip, offset, direction, &mut driver)?;

        log::info!(
            "Session started: clip {}, {} frames @ {} fps, loop {:?}, audio {} Hz/{} ch -> {} Hz/{} ch",
            info.clip,
            info.frames,
            info.fps,
            info.loop_mode,
            info.audio.rate,
            info.audio.channels,
            settings.output_rate,
            settings.output_channels
        );

        Ok(Self {
            calculator: FramePositionCalculator::new(settings.stop_policy).with_no_frame_drop(settings.no_frame_drop),
            settings,
            info,
            clock,
            clip_bounds,
            selection: None,
            frame,
            ticks,
            descriptor,
            resync,
            driver,
            filler,
            hooks,
            status,
            recorder: None,
            fps: Arc::new(AtomicF64::new(info.fps)),
            stop: None,
            paused: false,
            loop_restarts: 0,
            reported: Reported::default(),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TICK
    // ═══════════════════════════════════════════════════════════════════════════

    /// Advance to the frame for the current time
    pub fn tick(&mut self) -> SessionResult<FrameStep> {
        let now = self.ticks.now();
        self.tick_at(now)
    }

    pub fn tick_at(&mut self, now: Ticks) -> SessionResult<FrameStep> {
        if self.stop.is_some() {
            return Ok(self.hold(Verdict::Stop));
        }
        if self.paused {
            return Ok(self.hold(Verdict::Continue));
        }
        self.check_output()?;
        self.report_status();

        let prev = self.frame;
        let bounds = self.active_bounds();
        let step = self.calculator.compute_with_audio(
            prev,
            self.clock.last_tick,
            now,
            self.clock.fps,
            &bounds,
            self.clock.loop_mode,
            self.status.audio_exhausted(),
        );

        if let Some(reason) = StopReason::from_verdict(step.verdict) {
            self.request_stop(reason)?;
            return Ok(step);
        }

        if step.direction_flipped {
            // The callback mirrors audio at the same boundary by itself
            self.clock.flip_direction();
            self.resync.follow_direction(self.clock.direction());
            self.fps.store(self.clock.fps, Ordering::Relaxed);
            log::debug!("Ping-pong at frame {} -> {:?}", step.frame, self.clock.direction());
        } else if self.clock.loop_mode == LoopMode::Forward
            && self.selection.is_some()
            && wrapped(prev, step.frame, self.clock.direction())
        {
            self.loop_restarts += 1;
            let result = self.resync.on_loop_restart(&mut self.driver);
            if self.guard(result)?.is_none() {
                log::debug!("Loop wrap at frame {}; audio wraps by itself", step.frame);
            }
        }

        self.frame = step.frame;
        self.clock.last_tick = step.tick;
        Ok(step)
    }

    fn hold(&self, verdict: Verdict) -> FrameStep {
        FrameStep {
            frame: self.frame,
            tick: self.clock.last_tick,
            verdict,
            direction_flipped: false,
        }
    }

    fn check_output(&mut self) -> SessionResult<()> {
        match self.driver.check_liveness() {
            Ok(true) => Ok(()),
            Ok(false) => {
                log::info!("Output recovered (reconnect #{})", self.driver.reconnect_count());
                Ok(())
            }
            Err(e) => self.guard(Err(e.into())),
        }
    }

    /// Stop the session when `result` says the output is gone
    fn guard<T>(&mut self, result: SessionResult<T>) -> SessionResult<T> {
        if let Err(e) = &result
            && e.is_backend_failure()
            && self.stop.is_none()
        {
            log::error!("Output failed, stopping playback: {}", e);
            self.stop = Some(StopReason::BackendFailure);
            let _ = self.resync.close();
        }
        result
    }

    fn report_status(&mut self) {
        let state = self.status.state();
        if self.reported.state != Some(state) {
            log::debug!("Callback state: {:?}", state);
            self.reported.state = Some(state);
        }

        let discontinuities = self.status.discontinuities();
        if discontinuities > self.reported.discontinuities {
            log::warn!(
                "{} discontinuity(ies) covered with silence",
                discontinuities - self.reported.discontinuities
            );
            self.reported.discontinuities = discontinuities;
        }

        let misses = self.status.cache_misses();
        if misses > self.reported.cache_misses {
            log::debug!("{} cache miss(es)", misses - self.reported.cache_misses);
            self.reported.cache_misses = misses;
        }

        if !self.reported.recording_corrupt && self.recorder.as_ref().is_some_and(Recorder::is_corrupt) {
            log::error!("Recording is corrupt; it will be reported when the session ends");
            self.reported.recording_corrupt = true;
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TRANSPORT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Show `frame` now and move audio there. Returns the audio byte offset.
    pub fn jump_to(&mut self, frame: i64) -> SessionResult<i64> {
        let frame = self.active_bounds().clamp(frame);
        let result = self.resync.on_external_jump(frame, &mut self.driver);
        let offset = self.guard(result)?;
        self.frame = frame;
        self.clock.rebase(self.ticks.now());
        Ok(offset)
    }

    /// Restrict playback (and looping) to `selection`, or the whole clip
    pub fn set_selection(&mut self, selection: Option<FrameBounds>) -> SessionResult<()> {
        match selection {
            Some(bounds) => {
                if bounds.is_empty()
                    || !self.clip_bounds.contains(bounds.first_frame)
                    || !self.clip_bounds.contains(bounds.last_frame)
                {
                    return Err(SyncError::InvalidBounds {
                        first: bounds.first_frame,
                        last: bounds.last_frame,
                    }
                    .into());
                }
                self.descriptor.set_selection(&bounds, self.info.fps);
                log::info!("Selection {}..={}", bounds.first_frame, bounds.last_frame);
            }
            None => {
                self.descriptor.clear_selection();
                log::info!("Selection cleared");
            }
        }
        self.selection = selection;

        let bounds = self.active_bounds();
        if !bounds.contains(self.frame) {
            self.jump_to(bounds.clamp(self.frame))?;
        }
        Ok(())
    }

    /// Change loop mode; audio re-plans from the current frame
    pub fn set_loop_mode(&mut self, mode: LoopMode) -> SessionResult<()> {
        if mode == self.clock.loop_mode {
            return Ok(());
        }
        self.clock.loop_mode = mode;
        self.descriptor.set_loop_mode(mode);
        log::info!("Loop mode -> {:?}", mode);
        self.jump_to(self.frame).map(|_| ())
    }

    /// Change speed and direction
    pub fn set_fps(&mut self, fps: f64) -> SessionResult<()> {
        if fps == 0.0 || !fps.is_finite() {
            return Err(SyncError::InvalidFps(fps).into());
        }
        let direction = Direction::of(fps);
        if direction != self.clock.direction() {
            let result = self.resync.set_direction(direction, &mut self.driver);
            self.guard(result)?;
        }
        self.clock.set_fps(fps)?;
        self.fps.store(fps, Ordering::Relaxed);
        Ok(())
    }

    /// Shift audio against video by `delta`
    pub fn nudge(&mut self, delta: Ticks) -> SessionResult<i64> {
        let result = self.resync.nudge(delta, &mut self.driver);
        self.guard(result)
    }

    /// Silence output without losing sync; audio keeps advancing
    pub fn set_mute(&mut self, muted: bool) -> SessionResult<()> {
        if self.stop.is_some() {
            return Ok(());
        }
        let result = self.resync.set_mute(muted, &mut self.driver);
        self.guard(result)?;
        log::info!("Audio {}", if muted { "muted" } else { "unmuted" });
        Ok(())
    }

    /// Volume applied to everything the device plays
    pub fn set_master_volume(&mut self, volume: f32) -> SessionResult<()> {
        check_volume(volume)?;
        self.hooks.set_master_volume(volume);
        Ok(())
    }

    /// Volume applied to the clip's own audio
    pub fn set_clip_volume(&mut self, volume: f32) -> SessionResult<()> {
        check_volume(volume)?;
        self.hooks.set_clip_volume(volume);
        Ok(())
    }

    pub fn pause(&mut self) -> SessionResult<()> {
        if self.paused || self.stop.is_some() {
            return Ok(());
        }
        let result = self.resync.pause(&mut self.driver);
        self.guard(result)?;
        self.paused = true;
        log::info!("Paused at frame {}", self.frame);
        Ok(())
    }

    pub fn resume(&mut self) -> SessionResult<()> {
        if !self.paused || self.stop.is_some() {
            return Ok(());
        }
        let result = self.resync.resume(&mut self.driver);
        self.guard(result)?;
        self.paused = false;
        self.clock.rebase(self.ticks.now());
        log::info!("Resumed at frame {}", self.frame);
        Ok(())
    }

    /// Stop playback; the callback goes silent on its next buffer
    pub fn request_stop(&mut self, reason: StopReason) -> SessionResult<()> {
        if self.stop.is_some() {
            return Ok(());
        }
        log::info!("Stopping at frame {}: {:?}", self.frame, reason);
        self.stop = Some(reason);
        self.resync.close()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LIVE AUDIO / RECORDING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Play `generator` instead of the clip while it produces audio
    pub fn attach_generator(&mut self, generator: Option<Box<dyn LiveGenerator>>) {
        let attached = generator.is_some();
        drop(self.hooks.set_generator(generator));
        log::info!("Live generator {}", if attached { "attached" } else { "detached" });
    }

    /// Record device output into `sink`, converted to `format`
    pub fn start_recording(&mut self, sink: Box<dyn RecordingSink>, format: PcmFormat) -> SessionResult<()> {
        if self.recorder.is_some() {
            return Err(SessionError::RecordingActive);
        }
        let (recorder, tap) = Recorder::start(
            sink,
            format,
            self.settings.output_rate,
            self.settings.output_channels,
            self.settings.recording_ring_seconds,
        )?;
        drop(self.hooks.set_recording(Some(tap)));
        self.recorder = Some(recorder);
        self.reported.recording_corrupt = false;
        Ok(())
    }

    /// Detach the tap and wait for the recording to be written
    pub fn stop_recording(&mut self) -> SessionResult<Option<RecordingReport>> {
        let Some(recorder) = self.recorder.take() else {
            return Ok(None);
        };
        drop(self.hooks.set_recording(None));
        Ok(Some(recorder.finish()?))
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    /// Stop everything and report how the session went
    pub fn finish(mut self) -> SessionReport {
        if let Err(e) = self.request_stop(StopReason::User) {
            log::warn!("Could not queue close: {}", e);
        }
        self.report_status();

        let (recording, recording_error) = match self.stop_recording() {
            Ok(report) => (report, None),
            Err(e) => {
                log::error!("Recording failed: {}", e);
                (None, Some(e.to_string()))
            }
        };

        self.filler.shutdown();
        self.driver.shutdown();

        let report = SessionReport {
            stop_reason: self.stop.unwrap_or(StopReason::User),
            final_frame: self.frame,
            frames_written: self.status.frames_written(),
            discontinuities: self.status.discontinuities(),
            cache_misses: self.status.cache_misses(),
            reconnects: self.driver.reconnect_count(),
            loop_restarts: self.loop_restarts,
            recording,
            recording_error,
        };
        log::info!(
            "Session finished ({:?}) at frame {}: {} frames written, {} discontinuities",
            report.stop_reason,
            report.final_frame,
            report.frames_written,
            report.discontinuities
        );
        report
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STATUS
    // ═══════════════════════════════════════════════════════════════════════════

    #[inline]
    pub fn current_frame(&self) -> i64 {
        self.frame
    }

    /// Audio position in seconds of source audio
    pub fn current_seek_seconds(&self) -> f64 {
        self.descriptor.seek_seconds()
    }

    pub fn is_playing(&self) -> bool {
        self.stop.is_none() && !self.paused && self.status.state().is_rendering()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// The callback has applied a mute
    pub fn is_muted(&self) -> bool {
        self.status.is_muted()
    }

    pub fn master_volume(&self) -> f32 {
        self.hooks.master_volume()
    }

    pub fn clip_volume(&self) -> f32 {
        self.hooks.clip_volume()
    }

    #[inline]
    pub fn fps(&self) -> f64 {
        self.clock.fps
    }

    /// Live signed fps, readable from other threads
    pub fn fps_handle(&self) -> Arc<AtomicF64> {
        Arc::clone(&self.fps)
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }

    pub fn selection(&self) -> Option<FrameBounds> {
        self.selection
    }

    /// Selection if one is active, else the whole clip
    pub fn active_bounds(&self) -> FrameBounds {
        self.selection.unwrap_or(self.clip_bounds)
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.clock.loop_mode
    }

    pub fn clip(&self) -> &ClipInfo {
        &self.info
    }

    /// Forward-loop wraps of the video over the selection
    pub fn loop_restarts(&self) -> u64 {
        self.loop_restarts
    }

    pub fn reconnect_count(&self) -> u32 {
        self.driver.reconnect_count()
    }

    pub fn status(&self) -> &Arc<EngineStatus> {
        &self.status
    }

    pub fn descriptor(&self) -> &Arc<AudioStreamDescriptor> {
        &self.descriptor
    }

    pub fn driver(&self) -> &OutputDriver<B> {
        &self.driver
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}

fn check_volume(volume: f32) -> SessionResult<()> {
    if !volume.is_finite() || volume < 0.0 {
        return Err(SessionError::InvalidVolume(volume));
    }
    Ok(())
}

/// The step went against the direction of play (forward loop wrapped)
#[inline]
fn wrapped(prev: i64, next: i64, direction: Direction) -> bool {
    match direction {
        Direction::Forward => next < prev,
        Direction::Reverse => next > prev,
    }
}
