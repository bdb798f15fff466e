use serde::{Deserialize, Serialize};
use tracing::debug;

use beatlock_audio::PlaybackClock;
use beatlock_domain::{seconds_per_beat, SchedulerConfig, Tick};

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SchedulerState {
    pub running: bool,
    pub start_clock_time: f64,
    pub beat_period_seconds: f64,
    pub ticks_emitted: u64,
    pub beat_index_in_measure: u8,
}

/// Fires metronome ticks against an absolute schedule anchored at the start
/// time. Beat `n` is due at `start + n * period`, so lateness in one pass
/// never shifts later beats.
#[derive(Clone, Debug, Default)]
pub struct BeatScheduler {
    config: SchedulerConfig,
    state: SchedulerState,
}

impl BeatScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            state: SchedulerState::default(),
        }
    }

    /// Returns `false` and stays stopped for a zero tempo.
    pub fn start(&mut self, bpm: u32, start_time: f64) -> bool {
        if bpm == 0 {
            return false;
        }
        self.state = SchedulerState {
            running: true,
            start_clock_time: start_time,
            beat_period_seconds: seconds_per_beat(bpm),
            ticks_emitted: 0,
            beat_index_in_measure: 0,
        };
        debug!(bpm, start_time, "scheduler started");
        true
    }

    pub fn stop(&mut self) {
        self.state.running = false;
    }

    /// Clears counters after a stop.
    pub fn reset(&mut self) {
        self.state = SchedulerState::default();
    }

    pub fn is_running(&self) -> bool {
        self.state.running
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn next_tick_time(&self) -> Option<f64> {
        self.state.running.then(|| {
            self.state.start_clock_time
                + self.state.ticks_emitted as f64 * self.state.beat_period_seconds
        })
    }

    pub fn poll(&mut self, clock: &PlaybackClock) -> Vec<Tick> {
        self.poll_at(clock.now())
    }

    /// One scheduling pass. Fires at most one due tick, or every due tick
    /// when `catch_up` is configured.
    pub fn poll_at(&mut self, now: f64) -> Vec<Tick> {
        let mut fired = Vec::new();
        while let Some(tick) = self.fire_if_due(now) {
            fired.push(tick);
            if !self.config.catch_up {
                break;
            }
        }
        fired
    }

    fn fire_if_due(&mut self, now: f64) -> Option<Tick> {
        let scheduled_time = self.next_tick_time()?;
        if now < scheduled_time {
            return None;
        }
        let beat_in_measure = self.state.beat_index_in_measure;
        let tick = Tick {
            index: self.state.ticks_emitted,
            beat_in_measure,
            is_downbeat: beat_in_measure == 0,
            scheduled_time,
            fired_at: now,
            flash_until: now + self.config.flash_seconds,
        };
        self.state.ticks_emitted += 1;
        self.state.beat_index_in_measure =
            (beat_in_measure + 1) % self.config.beats_per_measure.max(1);
        debug!(
            index = tick.index,
            beat = beat_in_measure,
            late_by = tick.lateness(),
            "tick"
        );
        Some(tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn scheduler() -> BeatScheduler {
        BeatScheduler::new(SchedulerConfig::default())
    }

    #[test]
    fn ticks_follow_absolute_schedule() {
        let mut scheduler = scheduler();
        assert!(scheduler.start(120, 10.0));
        assert!(scheduler.poll_at(9.99).is_empty());

        let mut fired = Vec::new();
        for step in 0..=210 {
            let now = 10.0 + step as f64 * 0.01;
            fired.extend(scheduler.poll_at(now));
        }
        let times: Vec<f64> = fired.iter().map(|tick| tick.scheduled_time).collect();
        assert_eq!(times, vec![10.0, 10.5, 11.0, 11.5, 12.0]);
        let beats: Vec<u8> = fired.iter().map(|tick| tick.beat_in_measure).collect();
        assert_eq!(beats, vec![0, 1, 2, 3, 0]);
        assert!(fired[0].is_downbeat && fired[4].is_downbeat && !fired[1].is_downbeat);
    }

    #[test]
    fn counts_ticks_emitted() {
        let mut scheduler = scheduler();
        scheduler.start(120, 0.0);
        for beat in 0..4 {
            assert_eq!(scheduler.poll_at(beat as f64 * 0.5).len(), 1);
        }
        assert_eq!(scheduler.state().ticks_emitted, 4);
        assert_eq!(scheduler.state().beat_index_in_measure, 0);
        assert_eq!(scheduler.next_tick_time(), Some(2.0));
    }

    #[test]
    fn stall_fires_one_tick_per_pass_then_recovers() {
        let mut scheduler = scheduler();
        scheduler.start(120, 0.0);
        // Host stalls for 1.6s: beats at 0.0, 0.5, 1.0 and 1.5 are all due.
        assert_eq!(scheduler.poll_at(1.6).len(), 1);
        assert_eq!(scheduler.poll_at(1.61).len(), 1);
        assert_eq!(scheduler.poll_at(1.62).len(), 1);
        let last = scheduler.poll_at(1.63);
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].scheduled_time, 1.5);
        assert!(scheduler.poll_at(1.64).is_empty());
        // Schedule is unaffected by the stall.
        assert_eq!(scheduler.next_tick_time(), Some(2.0));
    }

    #[test]
    fn catch_up_fires_all_due_ticks_in_one_pass() {
        let mut scheduler = BeatScheduler::new(SchedulerConfig {
            catch_up: true,
            ..SchedulerConfig::default()
        });
        scheduler.start(120, 0.0);
        let fired = scheduler.poll_at(1.6);
        assert_eq!(fired.len(), 4);
        assert_eq!(fired[3].beat_in_measure, 3);
    }

    #[test]
    fn no_drift_under_jitter() {
        let mut scheduler = scheduler();
        scheduler.start(97, 3.0);
        let period = 60.0 / 97.0;
        let pass = 1.0 / 60.0;
        let mut now = 3.0;
        let mut fired = Vec::new();
        // Irregular pass spacing between 0.5 and 1.5 frame intervals.
        let mut step = 0u64;
        while fired.len() < 500 {
            fired.extend(scheduler.poll_at(now));
            step += 1;
            now += pass * (0.5 + (step % 3) as f64 * 0.5);
        }
        for (n, tick) in fired.iter().enumerate() {
            assert_abs_diff_eq!(tick.scheduled_time, 3.0 + n as f64 * period, epsilon = 1e-9);
            assert!(tick.lateness() >= 0.0);
            assert!(tick.lateness() <= 1.5 * pass + 1e-9);
        }
    }

    #[test]
    fn stop_halts_ticks_and_start_resets() {
        let mut scheduler = scheduler();
        scheduler.start(60, 0.0);
        assert_eq!(scheduler.poll_at(0.0).len(), 1);
        scheduler.stop();
        assert!(!scheduler.is_running());
        assert!(scheduler.poll_at(5.0).is_empty());
        assert!(scheduler.next_tick_time().is_none());

        scheduler.start(60, 10.0);
        assert_eq!(scheduler.state().ticks_emitted, 0);
        assert_eq!(scheduler.poll_at(10.0)[0].index, 0);
    }

    #[test]
    fn zero_bpm_does_not_start() {
        let mut scheduler = scheduler();
        assert!(!scheduler.start(0, 0.0));
        assert!(!scheduler.is_running());
    }

    #[test]
    fn flash_window_follows_config() {
        let mut scheduler = BeatScheduler::new(SchedulerConfig {
            flash_seconds: 0.25,
            beats_per_measure: 3,
            ..SchedulerConfig::default()
        });
        scheduler.start(60, 0.0);
        let tick = scheduler.poll_at(0.1).remove(0);
        assert_abs_diff_eq!(tick.flash_until, 0.35);
        let beats: Vec<u8> = (1..=4)
            .flat_map(|n| scheduler.poll_at(n as f64))
            .map(|tick| tick.beat_in_measure)
            .collect();
        assert_eq!(beats, vec![1, 2, 0, 1]);
    }
}
