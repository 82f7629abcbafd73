//! Frame Position Calculator
//!
//! Given the frame on screen, the timecode it was shown at and the current
//! tick, decides which frame comes next:
//! - elapsed time is floored to whole frame periods (the returned tick is the
//!   quantized timecode of the new frame)
//! - the new frame is folded back into the active range per loop mode
//! - ping-pong playback reports an odd winding number as a direction flip
//! - running off the end under `LoopMode::None` yields a stop verdict

use crate::{Direction, FrameBounds, LoopMode, StopPolicy, Ticks};

/// Outcome of one calculator step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Keep playing
    Continue,
    /// Nothing to play (clip without frames)
    Stop,
    /// Video ran past the active range
    StopVideo,
    /// Audio ran out and the stop policy follows audio
    StopAudio,
}

impl Verdict {
    #[inline]
    pub fn is_stop(self) -> bool {
        !matches!(self, Self::Continue)
    }
}

/// Result of `FramePositionCalculator::compute`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStep {
    /// Frame to display (always inside the bounds unless the range is empty)
    pub frame: i64,
    /// Quantized timecode of `frame`
    pub tick: Ticks,
    pub verdict: Verdict,
    /// Ping-pong reversed direction; the caller must negate fps
    pub direction_flipped: bool,
}

impl FrameStep {
    #[inline]
    fn unchanged(frame: i64, tick: Ticks) -> Self {
        Self {
            frame,
            tick,
            verdict: Verdict::Continue,
            direction_flipped: false,
        }
    }
}

/// Stateless next-frame computation, configured by stop policy
#[derive(Debug, Clone, Copy, Default)]
pub struct FramePositionCalculator {
    pub stop_policy: StopPolicy,
    /// Advance at most one frame per call instead of skipping late frames
    pub no_frame_drop: bool,
}

impl FramePositionCalculator {
    pub fn new(stop_policy: StopPolicy) -> Self {
        Self {
            stop_policy,
            no_frame_drop: false,
        }
    }

    pub fn with_no_frame_drop(mut self, enabled: bool) -> Self {
        self.no_frame_drop = enabled;
        self
    }

    /// Compute the next frame from video timing alone
    pub fn compute(
        &self,
        prev_frame: i64,
        prev_tick: Ticks,
        now_tick: Ticks,
        fps: f64,
        bounds: &FrameBounds,
        loop_mode: LoopMode,
    ) -> FrameStep {
        self.compute_with_audio(prev_frame, prev_tick, now_tick, fps, bounds, loop_mode, false)
    }

    /// Compute the next frame, also honoring an exhausted audio track when
    /// the stop policy follows audio
    #[allow(clippy::too_many_arguments)]
    pub fn compute_with_audio(
        &self,
        prev_frame: i64,
        prev_tick: Ticks,
        now_tick: Ticks,
        fps: f64,
        bounds: &FrameBounds,
        loop_mode: LoopMode,
        audio_exhausted: bool,
    ) -> FrameStep {
        if bounds.is_empty() {
            return FrameStep {
                verdict: Verdict::Stop,
                ..FrameStep::unchanged(prev_frame, prev_tick)
            };
        }

        if fps == 0.0 || !fps.is_finite() {
            return FrameStep::unchanged(prev_frame, prev_tick);
        }

        if audio_exhausted && self.stop_policy == StopPolicy::OnAudioEnd {
            return FrameStep {
                frame: bounds.clamp(prev_frame),
                tick: prev_tick,
                verdict: Verdict::StopAudio,
                direction_flipped: false,
            };
        }

        let mut frames = (now_tick - prev_tick).whole_frames(fps);
        if frames == 0 {
            return FrameStep::unchanged(prev_frame, prev_tick);
        }
        if self.no_frame_drop {
            frames = 1;
        }

        let tick = prev_tick + Ticks::for_frames(frames, fps);
        let delta = frames * Direction::of(fps).signum();
        let target = prev_frame + delta;

        match loop_mode {
            LoopMode::None => {
                let verdict = if bounds.contains(target) {
                    Verdict::Continue
                } else {
                    Verdict::StopVideo
                };
                FrameStep {
                    frame: bounds.clamp(target),
                    tick,
                    verdict,
                    direction_flipped: false,
                }
            }
            LoopMode::Forward => FrameStep {
                frame: bounds.first_frame + (target - bounds.first_frame).rem_euclid(bounds.len()),
                tick,
                verdict: Verdict::Continue,
                direction_flipped: false,
            },
            LoopMode::PingPong => {
                let (frame, direction_flipped) = reflect(prev_frame, delta, bounds);
                FrameStep {
                    frame,
                    tick,
                    verdict: Verdict::Continue,
                    direction_flipped,
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PING-PONG WINDING
// ═══════════════════════════════════════════════════════════════════════════════

#[inline]
fn ceil_div(a: i64, b: i64) -> i64 {
    -((-a).div_euclid(b))
}

/// Mirror `prev_frame + delta` into `bounds`.
///
/// Boundary frames are played once per pass, so a full cycle is
/// `2 * (len - 1)` frames. Arriving on a boundary counts as a reflection:
/// at `first_frame`/`last_frame` the direction always points back inside.
/// Returns the folded frame and whether the winding number is odd.
fn reflect(prev_frame: i64, delta: i64, bounds: &FrameBounds) -> (i64, bool) {
    let first = bounds.first_frame;
    let span = bounds.len() - 1;
    if span == 0 {
        return (first, false);
    }
    let period = 2 * span;

    let prev = bounds.clamp(prev_frame) - first;
    let mut dir = delta.signum();
    let mut reflections = 0;

    // Sitting on a boundary while heading outward: bounce before moving
    if (dir > 0 && prev == span) || (dir < 0 && prev == 0) {
        dir = -dir;
        reflections += 1;
    }

    let unfolded = prev + dir * delta.abs();
    reflections += if dir > 0 {
        unfolded.div_euclid(span)
    } else {
        1 - ceil_div(unfolded, span)
    };

    let phase = unfolded.rem_euclid(period);
    let offset = if phase <= span { phase } else { period - phase };

    (first + offset, reflections % 2 == 1)
}
