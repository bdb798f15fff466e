use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use beatlock_domain::ElapsedStrategy;

/// A monotonic, non-decreasing time source in seconds.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> f64;
}

/// Host stopwatch backed by [`Instant`], unaffected by wall-clock adjustments.
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Externally driven clock. Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(seconds: f64) -> Self {
        let clock = Self::default();
        clock.set(seconds);
        clock
    }

    pub fn set(&self, seconds: f64) {
        self.bits.store(seconds.to_bits(), Ordering::Release);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClockOrigin {
    /// Audio-clock time playback begins at.
    pub audio: f64,
    /// Stopwatch reading that corresponds to `audio`.
    pub wall: f64,
}

/// Playback position tracking against the audio engine clock, with a host
/// stopwatch alongside for display that must survive engine suspension.
pub struct PlaybackClock {
    audio: Arc<dyn TimeSource>,
    wall: Arc<dyn TimeSource>,
    origin: Option<ClockOrigin>,
}

impl PlaybackClock {
    pub fn new(audio: Arc<dyn TimeSource>) -> Self {
        Self::with_wall(audio, Arc::new(SystemClock::new()))
    }

    pub fn with_wall(audio: Arc<dyn TimeSource>, wall: Arc<dyn TimeSource>) -> Self {
        Self {
            audio,
            wall,
            origin: None,
        }
    }

    /// Anchors both clocks to `audio_origin`, which may lie slightly in the
    /// future when playback is scheduled ahead. Replaces any previous origin.
    pub fn start(&mut self, audio_origin: f64) -> ClockOrigin {
        let lead = audio_origin - self.audio.now();
        let origin = ClockOrigin {
            audio: audio_origin,
            wall: self.wall.now() + lead,
        };
        self.origin = Some(origin);
        origin
    }

    pub fn stop(&mut self) {
        self.origin = None;
    }

    pub fn origin(&self) -> Option<ClockOrigin> {
        self.origin
    }

    pub fn is_started(&self) -> bool {
        self.origin.is_some()
    }

    pub fn now(&self) -> f64 {
        self.audio.now()
    }

    pub fn audio_elapsed(&self) -> Option<f64> {
        self.origin.map(|origin| self.audio.now() - origin.audio)
    }

    pub fn wall_elapsed(&self) -> Option<f64> {
        self.origin.map(|origin| self.wall.now() - origin.wall)
    }

    /// Seconds since playback began, negative during the scheduled lead-in.
    pub fn elapsed_since_start(&self, strategy: ElapsedStrategy) -> Option<f64> {
        match strategy {
            ElapsedStrategy::AudioClock => self.audio_elapsed(),
            ElapsedStrategy::WallClock => self.wall_elapsed(),
        }
    }
}

impl std::fmt::Debug for PlaybackClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackClock")
            .field("origin", &self.origin)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(1.0);
        let shared = clock.clone();
        clock.advance(0.25);
        assert_eq!(shared.now(), 1.25);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }

    #[test]
    fn elapsed_is_none_until_started() {
        let clock = PlaybackClock::new(Arc::new(ManualClock::new(3.0)));
        assert!(clock.audio_elapsed().is_none());
        assert!(clock.elapsed_since_start(ElapsedStrategy::WallClock).is_none());
        assert_eq!(clock.now(), 3.0);
    }

    #[test]
    fn both_strategies_agree_with_lead_in() {
        let audio = ManualClock::new(10.0);
        let wall = ManualClock::new(500.0);
        let mut clock =
            PlaybackClock::with_wall(Arc::new(audio.clone()), Arc::new(wall.clone()));
        clock.start(10.1);

        assert_abs_diff_eq!(clock.audio_elapsed().unwrap(), -0.1, epsilon = 1e-9);
        assert_abs_diff_eq!(clock.wall_elapsed().unwrap(), -0.1, epsilon = 1e-9);

        audio.advance(2.0);
        wall.advance(2.0);
        assert_abs_diff_eq!(
            clock.elapsed_since_start(ElapsedStrategy::AudioClock).unwrap(),
            1.9,
            epsilon = 1e-9
        );
        assert_abs_diff_eq!(
            clock.elapsed_since_start(ElapsedStrategy::WallClock).unwrap(),
            1.9,
            epsilon = 1e-9
        );
    }

    #[test]
    fn wall_strategy_keeps_running_when_audio_stalls() {
        let audio = ManualClock::new(0.0);
        let wall = ManualClock::new(0.0);
        let mut clock =
            PlaybackClock::with_wall(Arc::new(audio.clone()), Arc::new(wall.clone()));
        clock.start(0.0);
        wall.advance(5.0);
        assert_eq!(clock.audio_elapsed(), Some(0.0));
        assert_eq!(clock.wall_elapsed(), Some(5.0));

        clock.stop();
        assert!(!clock.is_started());
    }
}
