use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TransportState {
    #[default]
    Idle,
    Loaded,
    Running,
    Stopped,
}

impl TransportState {
    /// Whether a start command is accepted from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, TransportState::Loaded | TransportState::Stopped)
    }
}

/// A single metronome beat as delivered to sinks.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Tick {
    /// Zero-based count of ticks fired since the scheduler started.
    pub index: u64,
    /// Position within the measure, `0..beats_per_measure`.
    pub beat_in_measure: u8,
    pub is_downbeat: bool,
    /// Ideal audio-clock time of this beat.
    pub scheduled_time: f64,
    /// Audio-clock time of the pass that fired it.
    pub fired_at: f64,
    /// Audio-clock time at which the visual flash should clear.
    pub flash_until: f64,
}

impl Tick {
    /// How late the pass was relative to the ideal beat time.
    pub fn lateness(&self) -> f64 {
        self.fired_at - self.scheduled_time
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Progress {
    /// Playback position normalised to `[0, 1]`.
    pub fraction: f64,
    /// `mm:ss / mm:ss`
    pub display: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_is_accepted_from_loaded_or_stopped() {
        assert!(TransportState::Loaded.can_start());
        assert!(TransportState::Stopped.can_start());
        assert!(!TransportState::Idle.can_start());
        assert!(!TransportState::Running.can_start());
    }

    #[test]
    fn tick_lateness() {
        let tick = Tick {
            index: 3,
            beat_in_measure: 3,
            is_downbeat: false,
            scheduled_time: 1.5,
            fired_at: 1.51,
            flash_until: 1.61,
        };
        assert!((tick.lateness() - 0.01).abs() < 1e-9);
    }
}
