//! Tick-based timing
//!
//! All sync arithmetic runs on integer ticks of 10 ns, so video and audio
//! positions never accumulate floating-point drift between calls.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Ticks per second (10 ns resolution)
pub const TICKS_PER_SECOND: i64 = 100_000_000;

/// Ticks per microsecond
pub const TICKS_PER_MICROSECOND: i64 = 100;

/// Rounding tolerance applied when converting a tick span to whole frames
const FRAME_EPSILON: f64 = 0.00001;

/// A point or span on the tick timeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ticks(pub i64);

impl Ticks {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub fn from_seconds(seconds: f64) -> Self {
        Self((seconds * TICKS_PER_SECOND as f64) as i64)
    }

    #[inline]
    pub fn from_micros(micros: i64) -> Self {
        Self(micros * TICKS_PER_MICROSECOND)
    }

    #[inline]
    pub fn from_duration(duration: Duration) -> Self {
        Self((duration.as_nanos() / 10) as i64)
    }

    #[inline]
    pub fn to_seconds(self) -> f64 {
        self.0 as f64 / TICKS_PER_SECOND as f64
    }

    /// Length of one frame at `fps` (sign ignored)
    #[inline]
    pub fn frame_period(fps: f64) -> Self {
        let fps = fps.abs();
        if fps == 0.0 || !fps.is_finite() {
            return Self::ZERO;
        }
        Self((TICKS_PER_SECOND as f64 / fps) as i64)
    }

    /// Number of whole frame periods at `|fps|` contained in this span.
    ///
    /// Negative spans and degenerate rates yield zero.
    #[inline]
    pub fn whole_frames(self, fps: f64) -> i64 {
        let fps = fps.abs();
        if self.0 <= 0 || fps == 0.0 || !fps.is_finite() {
            return 0;
        }
        (self.0 as f64 * fps / TICKS_PER_SECOND as f64 + FRAME_EPSILON).floor() as i64
    }

    /// Span covered by `frames` whole periods at `|fps|`
    #[inline]
    pub fn for_frames(frames: i64, fps: f64) -> Self {
        let fps = fps.abs();
        if fps == 0.0 || !fps.is_finite() {
            return Self::ZERO;
        }
        Self((frames as f64 * TICKS_PER_SECOND as f64 / fps) as i64)
    }

    /// Floor this span to the nearest whole frame period at `|fps|`
    #[inline]
    pub fn quantize_floor(self, fps: f64) -> Self {
        Self::for_frames(self.whole_frames(fps), fps)
    }
}

impl std::ops::Add for Ticks {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Ticks {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TICK SOURCES
// ═══════════════════════════════════════════════════════════════════════════════

/// A monotonic source of ticks
pub trait TickSource: Send + Sync {
    fn now(&self) -> Ticks;
}

/// Wall-clock ticks measured from the moment the clock was created
#[derive(Debug, Clone)]
pub struct TickClock {
    origin: Instant,
}

impl TickClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for TickClock {
    #[inline]
    fn now(&self) -> Ticks {
        Ticks::from_duration(self.origin.elapsed())
    }
}

/// Externally driven ticks (offline rendering, tests)
///
/// `set` refuses to move backwards so the source stays monotonic.
#[derive(Debug, Default)]
pub struct ManualTicks {
    ticks: AtomicI64,
}

impl ManualTicks {
    pub fn new(start: Ticks) -> Self {
        Self {
            ticks: AtomicI64::new(start.0),
        }
    }

    pub fn advance(&self, by: Ticks) {
        if by.0 > 0 {
            self.ticks.fetch_add(by.0, Ordering::AcqRel);
        }
    }

    pub fn set(&self, to: Ticks) {
        self.ticks.fetch_max(to.0, Ordering::AcqRel);
    }
}

impl TickSource for ManualTicks {
    #[inline]
    fn now(&self) -> Ticks {
        Ticks(self.ticks.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_unit_conversion() {
        assert_eq!(Ticks::from_seconds(1.0).0, TICKS_PER_SECOND);
        assert_eq!(Ticks::from_micros(1).0, 100);
        assert_eq!(Ticks::from_duration(Duration::from_millis(40)).0, 4_000_000);
        assert_relative_eq!(Ticks(50_000_000).to_seconds(), 0.5);
    }

    #[test]
    fn test_frame_period_seconds() {
        assert_relative_eq!(Ticks::frame_period(25.0).to_seconds(), 0.04);
        assert_relative_eq!(Ticks::frame_period(-25.0).to_seconds(), 0.04);
        assert_relative_eq!(Ticks::frame_period(29.97).to_seconds(), 1.0 / 29.97, epsilon = 1e-8);
    }

    #[test]
    fn test_whole_frames_floors() {
        let period = Ticks::frame_period(25.0);
        assert_eq!(period.0, 4_000_000);

        assert_eq!(Ticks(period.0 * 3).whole_frames(25.0), 3);
        assert_eq!(Ticks(period.0 * 3 - 1000).whole_frames(25.0), 2);
        assert_eq!(Ticks(period.0 * 3 + period.0 / 2).whole_frames(-25.0), 3);
        assert_eq!(Ticks(-period.0).whole_frames(25.0), 0);
        assert_eq!(Ticks(period.0).whole_frames(0.0), 0);
    }

    #[test]
    fn test_quantize_floor_ntsc() {
        // 29.97 fps periods are not integral in ticks; the epsilon keeps
        // exact multiples from flooring one frame short
        let span = Ticks::for_frames(10, 29.97);
        assert_eq!(span.whole_frames(29.97), 10);
        assert!(span.quantize_floor(29.97).0 <= span.0);
    }

    #[test]
    fn test_manual_ticks_monotonic() {
        let ticks = ManualTicks::new(Ticks(1000));
        ticks.advance(Ticks(500));
        assert_eq!(ticks.now(), Ticks(1500));

        ticks.set(Ticks(200));
        assert_eq!(ticks.now(), Ticks(1500));

        ticks.set(Ticks(9000));
        assert_eq!(ticks.now(), Ticks(9000));
    }

    #[test]
    fn test_tick_clock_monotonic() {
        let clock = TickClock::new();
        let a = clock.now();
        std::thread::sleep(Duration::from_millis(2));
        let b = clock.now();
        assert!(b > a);
        assert!(b.0 - a.0 >= 2 * 1000 * TICKS_PER_MICROSECOND);
    }
}
