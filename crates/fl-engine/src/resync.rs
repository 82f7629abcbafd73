//! Resync Controller
//!
//! Turns video-side events (external jumps, loop restarts, direction
//! changes, nudges) into control messages for the device callback.
//!
//! Seeks always travel with the video's direction. The callback reflects
//! ping-pong audio on its own at the byte edges, which it reaches at a
//! different moment than the video reaches its edge frame.
//!
//! At most one batch is ever in flight: before posting, the controller waits
//! a bounded time for the callback to drain the queue. A timeout means the
//! callback is not running, so the output is force-reconnected and the wait
//! repeated once before giving up with `SeekTimeout`.

use std::sync::Arc;
use std::time::Duration;

use fl_audio::{
    AudioBackend, AudioError, AudioResult, AudioStreamDescriptor, ControlMessage, ControlSender, OutputDriver,
};
use fl_core::{ClipId, Direction, Ticks};

use crate::SessionResult;

/// Something that can tear down and rebuild the output stream
pub trait Reconnect {
    fn force_reconnect(&mut self) -> AudioResult<()>;
}

impl<B: AudioBackend> Reconnect for OutputDriver<B> {
    fn force_reconnect(&mut self) -> AudioResult<()> {
        self.reconnect()
    }
}

pub struct ResyncController {
    descriptor: Arc<AudioStreamDescriptor>,
    control: ControlSender,
    /// Clip frame rate used to map frames to audio (magnitude only)
    clip_fps: f64,
    /// Direction audio was last told to play in
    direction: Direction,
    drain_timeout: Duration,
    timeouts: u64,
}

impl ResyncController {
    pub fn new(
        descriptor: Arc<AudioStreamDescriptor>,
        control: ControlSender,
        clip_fps: f64,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            descriptor,
            control,
            clip_fps: clip_fps.abs(),
            direction: Direction::of(clip_fps),
            drain_timeout,
            timeouts: 0,
        }
    }

    pub fn descriptor(&self) -> &Arc<AudioStreamDescriptor> {
        &self.descriptor
    }

    pub fn control(&self) -> &ControlSender {
        &self.control
    }

    /// Drain waits that ran out
    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Record a direction change the callback made on its own (ping-pong)
    pub fn follow_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    /// Open `clip` at `offset`, playing in `direction`
    pub fn open(
        &mut self,
        clip: ClipId,
        offset: i64,
        direction: Direction,
        link: &mut dyn Reconnect,
    ) -> SessionResult<()> {
        log::info!("Opening clip {} at byte {} ({:?})", clip, offset, direction);
        self.post(
            &[
                ControlMessage::open(clip),
                ControlMessage::seek(offset),
                ControlMessage::set_direction(direction),
            ],
            link,
        )?;
        self.direction = direction;
        Ok(())
    }

    /// Move audio to video frame `frame`: its start when playing forward,
    /// its end in reverse. Returns the byte offset that was requested.
    pub fn on_external_jump(&mut self, frame: i64, link: &mut dyn Reconnect) -> SessionResult<i64> {
        let edge = match self.direction {
            Direction::Forward => frame,
            Direction::Reverse => frame + 1,
        };
        let offset = self.descriptor.frame_to_offset(edge, self.clip_fps);
        log::debug!("Jump to frame {} -> byte {} ({:?})", frame, offset, self.direction);
        self.seek_with_direction(offset, link)?;
        Ok(offset)
    }

    /// Video wrapped around a forward-looping selection. Audio inside the
    /// selection wraps by itself; only audio outside it is moved to the edge
    /// playback wraps to. Returns the offset when a seek was sent.
    pub fn on_loop_restart(&mut self, link: &mut dyn Reconnect) -> SessionResult<Option<i64>> {
        let loop_start = self.descriptor.loop_start();
        let seek_end = self.descriptor.seek_end();
        let position = self.descriptor.seek_pos();
        if (loop_start..=seek_end).contains(&position) {
            return Ok(None);
        }

        let offset = match self.direction {
            Direction::Forward => loop_start,
            Direction::Reverse => seek_end,
        };
        log::debug!("Loop restart: audio at byte {} -> {}", position, offset);
        self.seek_with_direction(offset, link)?;
        Ok(Some(offset))
    }

    pub fn set_direction(&mut self, direction: Direction, link: &mut dyn Reconnect) -> SessionResult<()> {
        log::debug!("Audio direction -> {:?}", direction);
        self.post(&[ControlMessage::set_direction(direction)], link)?;
        self.direction = direction;
        Ok(())
    }

    /// Shift audio by `delta` relative to where it currently plays
    pub fn nudge(&mut self, delta: Ticks, link: &mut dyn Reconnect) -> SessionResult<i64> {
        let bytes = self.descriptor.ticks_to_bytes(delta);
        if bytes != 0 {
            self.post(&[ControlMessage::seek_adjust(bytes)], link)?;
        }
        Ok(bytes)
    }

    /// Silence output while audio keeps its place
    pub fn set_mute(&mut self, muted: bool, link: &mut dyn Reconnect) -> SessionResult<()> {
        self.post(&[ControlMessage::mute(muted)], link)
    }

    pub fn pause(&mut self, link: &mut dyn Reconnect) -> SessionResult<()> {
        self.post(&[ControlMessage::pause()], link)
    }

    pub fn resume(&mut self, link: &mut dyn Reconnect) -> SessionResult<()> {
        self.post(&[ControlMessage::resume()], link)
    }

    /// Queue a CLOSE without waiting; the callback acknowledges it on its
    /// next buffer
    pub fn close(&mut self) -> SessionResult<()> {
        self.control.send(ControlMessage::close())?;
        Ok(())
    }

    fn seek_with_direction(&mut self, offset: i64, link: &mut dyn Reconnect) -> SessionResult<()> {
        self.post(
            &[ControlMessage::seek(offset), ControlMessage::set_direction(self.direction)],
            link,
        )
    }

    fn post(&mut self, batch: &[ControlMessage], link: &mut dyn Reconnect) -> SessionResult<()> {
        if !self.control.wait_drained(self.drain_timeout) {
            self.timeouts += 1;
            log::warn!(
                "Control queue still holds {} message(s) after {:?}; reconnecting output",
                self.control.pending(),
                self.drain_timeout
            );
            link.force_reconnect()?;
            if !self.control.wait_drained(self.drain_timeout) {
                log::error!("Control queue did not drain after reconnect");
                return Err(AudioError::SeekTimeout(self.drain_timeout).into());
            }
        }
        for &message in batch {
            self.control.send(message)?;
        }
        Ok(())
    }
}
